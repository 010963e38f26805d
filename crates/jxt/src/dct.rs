//! DCT kernels.
//!
//! Two kernels share one interface: the float kernel (AA&N factorization
//! with the per-cell scale factors folded into the quantizer) and the
//! integer lifting kernel, which is exactly invertible and backs the
//! reversible and residual paths.
//!
//! The kernel is picked once per scan and dispatched through [`DctKernel`],
//! so the choice costs one match per block row rather than a virtual call
//! per coefficient.

pub mod float;
pub mod lifting;

use crate::quant::IntQuantizer;

/// A forward/inverse DCT pair bound to its quantizer.
pub enum DctKernel {
    /// AA&N float kernel, `preshift` extra fractional coefficient bits.
    Float(float::FloatDct),
    /// Plonka-Tasche lifting kernel, bit exact inverse.
    Lifting(lifting::LiftingDct)
}

impl DctKernel {
    /// Transform and quantize one block. `source` and `target` are in
    /// natural order, `dc_offset` is the level shift of the sample domain.
    pub fn forward(&mut self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        match self {
            DctKernel::Float(kernel) => kernel.forward(source, target, dc_offset),
            DctKernel::Lifting(kernel) => kernel.forward(source, target, dc_offset)
        }
    }

    /// Dequantize and inverse transform one block.
    pub fn inverse(&self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        match self {
            DctKernel::Float(kernel) => kernel.inverse(source, target, dc_offset),
            DctKernel::Lifting(kernel) => kernel.inverse(source, target, dc_offset)
        }
    }

    /// The unquantized coefficients of the last forward transform, when
    /// the kernel keeps them for rate-distortion optimization.
    pub fn unquantized(&self) -> Option<&[i32; 64]> {
        match self {
            DctKernel::Float(kernel) => kernel.unquantized(),
            DctKernel::Lifting(kernel) => kernel.unquantized()
        }
    }

    /// Effective quantization steps of this kernel.
    pub fn steps(&self) -> [i32; 64] {
        match self {
            DctKernel::Float(kernel) => kernel.steps(),
            DctKernel::Lifting(kernel) => kernel.steps()
        }
    }
}

/// Build the kernel for a component from its quantization table.
pub fn kernel_for(
    table: &[u16; 64], reversible: bool, preshift: u8, dead_zone: bool, optimize: bool
) -> DctKernel {
    if reversible {
        let quant = IntQuantizer::new(table, dead_zone);
        DctKernel::Lifting(lifting::LiftingDct::new(quant, preshift, optimize))
    } else if dead_zone {
        DctKernel::Float(float::FloatDct::new_with_deadzone(table, preshift, optimize))
    } else {
        DctKernel::Float(float::FloatDct::new_with_optimize(table, preshift, optimize))
    }
}
