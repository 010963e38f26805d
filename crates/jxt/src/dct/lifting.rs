//! The integer lifting kernel.
//!
//! A DCT-II built entirely from lifting steps after Plonka and Tasche,
//! with the butterflies replaced by three-shear rotations so that forward
//! followed by inverse is the identity on integer inputs. Rotation
//! constants are 12 bit fixed point tangents and sines; every
//! multiplication is a shift-add chain with a single rounding shift at the
//! end, which is what makes each shear exactly undoable.

use crate::quant::IntQuantizer;

const FRACT_BITS: u32 = 12;

#[inline(always)]
fn round_fract(x: i64) -> i64 {
    (x + (1 << (FRACT_BITS - 1))) >> FRACT_BITS
}

// multiply by 403, tan(pi/16) in 12 bit fixed point
#[inline(always)]
fn pmul_tan1(x: i64) -> i64 {
    let t = x + (x << 1);
    round_fract(t + (x << 4) + (t << 7))
}

// multiply by 1243, tan(3pi/16)
#[inline(always)]
fn pmul_tan3(x: i64) -> i64 {
    let t = x + (x << 1);
    round_fract(t + (t << 3) + (t << 6) + (x << 10))
}

// multiply by 1697, tan(4pi/16) halved into the shear form
#[inline(always)]
fn pmul_tan4(x: i64) -> i64 {
    round_fract(x + (x << 5) + (x << 7) + (x << 9) + (x << 10))
}

// multiply by 815, tan(2pi/16) in shear form
#[inline(always)]
fn pmul_tan2(x: i64) -> i64 {
    round_fract((x << 6) - (x << 4) - x + (x << 8) + (x << 9))
}

// multiply by 799, sin(pi/16) scaled
#[inline(always)]
fn pmul_sin1(x: i64) -> i64 {
    round_fract((x << 5) - x + (x << 8) + (x << 9))
}

// multiply by 2276, sin(3pi/16) scaled
#[inline(always)]
fn pmul_sin3(x: i64) -> i64 {
    round_fract((x << 8) - (x << 5) + (x << 2) + (x << 11))
}

// multiply by 1567, sin(2pi/16) scaled
#[inline(always)]
fn pmul_sin2(x: i64) -> i64 {
    round_fract((x << 5) - x + (x << 9) + (x << 10))
}

// multiply by 2896, sin(4pi/16) scaled
#[inline(always)]
fn pmul_sin4(x: i64) -> i64 {
    let t = x + (x << 2);
    round_fract((x << 4) + (t << 6) + (t << 9))
}

/// The lifting DCT bound to its quantizer.
pub struct LiftingDct {
    quant:       IntQuantizer,
    preshift:    u8,
    /// Unquantized transform output of the last forward call, kept when
    /// rate-distortion optimization wants a second look.
    transform:   Option<Box<[i32; 64]>>
}

impl LiftingDct {
    #[must_use]
    pub fn new(quant: IntQuantizer, preshift: u8, optimize: bool) -> LiftingDct {
        LiftingDct {
            quant,
            preshift,
            transform: if optimize { Some(Box::new([0; 64])) } else { None }
        }
    }

    #[must_use]
    pub fn unquantized(&self) -> Option<&[i32; 64]> {
        self.transform.as_deref()
    }

    #[must_use]
    pub fn steps(&self) -> [i32; 64] {
        self.quant.step
    }

    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    fn quantize(&mut self, n: i64, band: usize) -> i32 {
        if let Some(transform) = self.transform.as_deref_mut() {
            transform[band] = n as i32;
        }
        self.quant.quantize(n as i32, band)
    }

    /// Forward transform and quantization, natural order blocks.
    ///
    /// The kernel has a DC gain of eight, so the level shift is applied
    /// scaled by eight on the DC band.
    #[allow(clippy::similar_names, clippy::too_many_lines)]
    pub fn forward(&mut self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        let mut dc_bias = i64::from(dc_offset) << 3;
        let preshift = self.preshift;
        let mut tmp = [0_i64; 64];

        // columns
        for col in 0..8 {
            let mut x0 = i64::from(source[col]) >> preshift;
            let mut x4 = i64::from(source[col + 56]) >> preshift;
            x0 += pmul_tan4(x4);
            x4 -= pmul_sin4(x0);
            x0 += pmul_tan4(x4);
            x4 = -x4;
            let mut x1 = i64::from(source[col + 8]) >> preshift;
            let mut x5 = i64::from(source[col + 48]) >> preshift;
            x1 += pmul_tan4(x5);
            x5 -= pmul_sin4(x1);
            x1 += pmul_tan4(x5);
            x5 = -x5;
            let mut x2 = i64::from(source[col + 16]) >> preshift;
            let mut x6 = i64::from(source[col + 40]) >> preshift;
            x2 += pmul_tan4(x6);
            x6 -= pmul_sin4(x2);
            x2 += pmul_tan4(x6);
            x6 = -x6;
            let mut x3 = i64::from(source[col + 24]) >> preshift;
            let mut x7 = i64::from(source[col + 32]) >> preshift;
            x3 += pmul_tan4(x7);
            x7 -= pmul_sin4(x3);
            x3 += pmul_tan4(x7);
            x7 = -x7;

            // the bold-Z vector from x0..x3
            let mut zb0 = x0 + pmul_tan4(x3);
            let mut zb2 = x3 - pmul_sin4(zb0);
            zb0 += pmul_tan4(zb2);
            zb2 = -zb2;
            let mut zb1 = x1 + pmul_tan4(x2);
            let mut zb3 = x2 - pmul_sin4(zb1);
            zb1 += pmul_tan4(zb3);
            zb3 = -zb3;

            // two three-shear rotations over the w vector
            let mut z00 = pmul_tan1(x7) + x4;
            let mut z01 = pmul_tan3(x6) + x5;
            let mut z10 = -pmul_sin1(z00) + x7;
            let mut z11 = -pmul_sin3(z01) + x6;
            let mut z20 = pmul_tan1(z10) + z00;
            let mut z21 = pmul_tan3(z11) + z01;

            // lower half, C_II plus C_II
            let mut zc0 = z20 + pmul_tan4(z21);
            let mut zc1 = z21 - pmul_sin4(zc0);
            zc0 += pmul_tan4(zc1);
            zc1 = -zc1;
            let mut zc3 = z11 + pmul_tan4(z10);
            let mut zc2 = z10 - pmul_sin4(zc3);
            zc3 += pmul_tan4(zc2);
            zc2 = -zc2;

            // upper half rotations by pi/4 and pi/8
            z00 = pmul_tan4(zb1) + zb0;
            z01 = pmul_tan2(zb3) + zb2;
            z10 = -pmul_sin4(z00) + zb1;
            z11 = -pmul_sin2(z01) + zb3;
            z20 = pmul_tan4(z10) + z00;
            z21 = pmul_tan2(z11) + z01;

            let z0 = pmul_tan4(zc3) + zc1;
            let z1 = -pmul_sin4(z0) + zc3;
            let x45 = pmul_tan4(z1) + z0;

            tmp[col] = z20;
            tmp[col + 8] = zc0;
            tmp[col + 16] = z21;
            tmp[col + 24] = -z1;
            tmp[col + 32] = -z10;
            tmp[col + 40] = x45;
            tmp[col + 48] = -z11;
            tmp[col + 56] = zc2;
        }

        // rows, quantizing on the way out
        for (row_index, row) in tmp.chunks_exact(8).enumerate() {
            let band = row_index * 8;

            let mut x0 = row[0];
            let mut x4 = row[7];
            x0 += pmul_tan4(x4);
            x4 -= pmul_sin4(x0);
            x0 += pmul_tan4(x4);
            x4 = -x4;
            let mut x1 = row[1];
            let mut x5 = row[6];
            x1 += pmul_tan4(x5);
            x5 -= pmul_sin4(x1);
            x1 += pmul_tan4(x5);
            x5 = -x5;
            let mut x2 = row[2];
            let mut x6 = row[5];
            x2 += pmul_tan4(x6);
            x6 -= pmul_sin4(x2);
            x2 += pmul_tan4(x6);
            x6 = -x6;
            let mut x3 = row[3];
            let mut x7 = row[4];
            x3 += pmul_tan4(x7);
            x7 -= pmul_sin4(x3);
            x3 += pmul_tan4(x7);
            x7 = -x7;

            let mut zb0 = x0 + pmul_tan4(x3);
            let mut zb2 = x3 - pmul_sin4(zb0);
            zb0 += pmul_tan4(zb2);
            zb2 = -zb2;
            let mut zb1 = x1 + pmul_tan4(x2);
            let mut zb3 = x2 - pmul_sin4(zb1);
            zb1 += pmul_tan4(zb3);
            zb3 = -zb3;

            let mut z00 = pmul_tan1(x7) + x4;
            let mut z01 = pmul_tan3(x6) + x5;
            let mut z10 = -pmul_sin1(z00) + x7;
            let mut z11 = -pmul_sin3(z01) + x6;
            let mut z20 = pmul_tan1(z10) + z00;
            let mut z21 = pmul_tan3(z11) + z01;

            let mut zc0 = z20 + pmul_tan4(z21);
            let mut zc1 = z21 - pmul_sin4(zc0);
            zc0 += pmul_tan4(zc1);
            zc1 = -zc1;
            let mut zc3 = z11 + pmul_tan4(z10);
            let mut zc2 = z10 - pmul_sin4(zc3);
            zc3 += pmul_tan4(zc2);
            zc2 = -zc2;

            z00 = pmul_tan4(zb1) + zb0;
            z01 = pmul_tan2(zb3) + zb2;
            z10 = -pmul_sin4(z00) + zb1;
            z11 = -pmul_sin2(z01) + zb3;
            z20 = pmul_tan4(z10) + z00;
            z21 = pmul_tan2(z11) + z01;

            let z0 = pmul_tan4(zc3) + zc1;
            let z1 = -pmul_sin4(z0) + zc3;
            let x45 = pmul_tan4(z1) + z0;

            target[band] = self.quantize(z20 - dc_bias, band);
            target[band + 1] = self.quantize(zc0, band + 1);
            target[band + 2] = self.quantize(z21, band + 2);
            target[band + 3] = self.quantize(-z1, band + 3);
            target[band + 4] = self.quantize(-z10, band + 4);
            target[band + 5] = self.quantize(x45, band + 5);
            target[band + 6] = self.quantize(-z11, band + 6);
            target[band + 7] = self.quantize(zc2, band + 7);

            dc_bias = 0;
        }
    }

    /// Dequantize and inverse transform, the exact mirror of
    /// [`Self::forward`].
    #[allow(clippy::similar_names, clippy::too_many_lines)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn inverse(&self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        let mut dc_bias = i64::from(dc_offset) << 3;
        let preshift = self.preshift;
        let mut tmp = [0_i64; 64];

        // rows
        for (row_index, row) in tmp.chunks_exact_mut(8).enumerate() {
            let band = row_index * 8;

            let mut z20 = i64::from(self.quant.dequantize(source[band], band)) + dc_bias;
            let mut zc0 = i64::from(self.quant.dequantize(source[band + 1], band + 1));
            let mut z21 = i64::from(self.quant.dequantize(source[band + 2], band + 2));
            let z1 = -i64::from(self.quant.dequantize(source[band + 3], band + 3));
            let mut z10 = -i64::from(self.quant.dequantize(source[band + 4], band + 4));
            let x45 = i64::from(self.quant.dequantize(source[band + 5], band + 5));
            let mut z11 = -i64::from(self.quant.dequantize(source[band + 6], band + 6));
            let mut zc2 = i64::from(self.quant.dequantize(source[band + 7], band + 7));

            // undo the pi/4 rotation that made x45
            let z0 = x45 - pmul_tan4(z1);
            let mut zc3 = z1 + pmul_sin4(z0);
            let mut zc1 = z0 - pmul_tan4(zc3);

            // undo the upper-half rotation pair
            let z00 = z20 - pmul_tan4(z10);
            let z01 = z21 - pmul_tan2(z11);
            let mut zb1 = z10 + pmul_sin4(z00);
            let mut zb3 = z11 + pmul_sin2(z01);
            let mut zb0 = z00 - pmul_tan4(zb1);
            let mut zb2 = z01 - pmul_tan2(zb3);

            // small butterflies, inverted up to the sign flips
            zc1 = -zc1;
            zc0 -= pmul_tan4(zc1);
            z21 = zc1 + pmul_sin4(zc0);
            z20 = zc0 - pmul_tan4(z21);
            zc2 = -zc2;
            zc3 -= pmul_tan4(zc2);
            z10 = zc2 + pmul_sin4(zc3);
            z11 = zc3 - pmul_tan4(z10);

            // rotations by 3pi/16 and pi/16
            let z00 = z20 - pmul_tan1(z10);
            let z01 = z21 - pmul_tan3(z11);
            let mut x7 = z10 + pmul_sin1(z00);
            let mut x6 = z11 + pmul_sin3(z01);
            let mut x4 = z00 - pmul_tan1(x7);
            let mut x5 = z01 - pmul_tan3(x6);

            zb2 = -zb2;
            zb0 -= pmul_tan4(zb2);
            let mut x3 = zb2 + pmul_sin4(zb0);
            let mut x0 = zb0 - pmul_tan4(x3);

            zb3 = -zb3;
            zb1 -= pmul_tan4(zb3);
            let mut x2 = zb3 + pmul_sin4(zb1);
            let mut x1 = zb1 - pmul_tan4(x2);

            // output butterflies
            x4 = -x4;
            x0 -= pmul_tan4(x4);
            x4 += pmul_sin4(x0);
            x0 -= pmul_tan4(x4);
            row[0] = x0;
            row[7] = x4;

            x5 = -x5;
            x1 -= pmul_tan4(x5);
            x5 += pmul_sin4(x1);
            x1 -= pmul_tan4(x5);
            row[1] = x1;
            row[6] = x5;

            x6 = -x6;
            x2 -= pmul_tan4(x6);
            x6 += pmul_sin4(x2);
            x2 -= pmul_tan4(x6);
            row[2] = x2;
            row[5] = x6;

            x7 = -x7;
            x3 -= pmul_tan4(x7);
            x7 += pmul_sin4(x3);
            x3 -= pmul_tan4(x7);
            row[3] = x3;
            row[4] = x7;

            dc_bias = 0;
        }

        // columns
        for col in 0..8 {
            let mut z20 = tmp[col];
            let mut zc0 = tmp[col + 8];
            let mut z21 = tmp[col + 16];
            let z1 = -tmp[col + 24];
            let mut z10 = -tmp[col + 32];
            let x45 = tmp[col + 40];
            let mut z11 = -tmp[col + 48];
            let mut zc2 = tmp[col + 56];

            let z0 = x45 - pmul_tan4(z1);
            let mut zc3 = z1 + pmul_sin4(z0);
            let mut zc1 = z0 - pmul_tan4(zc3);

            let z00 = z20 - pmul_tan4(z10);
            let z01 = z21 - pmul_tan2(z11);
            let mut zb1 = z10 + pmul_sin4(z00);
            let mut zb3 = z11 + pmul_sin2(z01);
            let mut zb0 = z00 - pmul_tan4(zb1);
            let mut zb2 = z01 - pmul_tan2(zb3);

            zc1 = -zc1;
            zc0 -= pmul_tan4(zc1);
            z21 = zc1 + pmul_sin4(zc0);
            z20 = zc0 - pmul_tan4(z21);
            zc2 = -zc2;
            zc3 -= pmul_tan4(zc2);
            z10 = zc2 + pmul_sin4(zc3);
            z11 = zc3 - pmul_tan4(z10);

            let z00 = z20 - pmul_tan1(z10);
            let z01 = z21 - pmul_tan3(z11);
            let mut x7 = z10 + pmul_sin1(z00);
            let mut x6 = z11 + pmul_sin3(z01);
            let mut x4 = z00 - pmul_tan1(x7);
            let mut x5 = z01 - pmul_tan3(x6);

            zb2 = -zb2;
            zb0 -= pmul_tan4(zb2);
            let mut x3 = zb2 + pmul_sin4(zb0);
            let mut x0 = zb0 - pmul_tan4(x3);

            zb3 = -zb3;
            zb1 -= pmul_tan4(zb3);
            let mut x2 = zb3 + pmul_sin4(zb1);
            let mut x1 = zb1 - pmul_tan4(x2);

            x4 = -x4;
            x0 -= pmul_tan4(x4);
            x4 += pmul_sin4(x0);
            x0 -= pmul_tan4(x4);
            target[col] = (x0 << preshift) as i32;
            target[col + 56] = (x4 << preshift) as i32;

            x5 = -x5;
            x1 -= pmul_tan4(x5);
            x5 += pmul_sin4(x1);
            x1 -= pmul_tan4(x5);
            target[col + 8] = (x1 << preshift) as i32;
            target[col + 48] = (x5 << preshift) as i32;

            x6 = -x6;
            x2 -= pmul_tan4(x6);
            x6 += pmul_sin4(x2);
            x2 -= pmul_tan4(x6);
            target[col + 16] = (x2 << preshift) as i32;
            target[col + 40] = (x6 << preshift) as i32;

            x7 = -x7;
            x3 -= pmul_tan4(x7);
            x7 += pmul_sin4(x3);
            x3 -= pmul_tan4(x7);
            target[col + 24] = (x3 << preshift) as i32;
            target[col + 32] = (x7 << preshift) as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_kernel() -> LiftingDct {
        LiftingDct::new(IntQuantizer::new(&[1_u16; 64], false), 0, false)
    }

    #[test]
    fn forward_then_inverse_is_identity() {
        let mut kernel = identity_kernel();

        // deterministic pseudo-random samples across the 8 bit range
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut source = [0_i32; 64];
        for value in &mut source {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *value = (state % 256) as i32;
        }

        let mut coeffs = [0_i32; 64];
        kernel.forward(&source, &mut coeffs, 128);

        let mut recon = [0_i32; 64];
        kernel.inverse(&coeffs, &mut recon, 128);

        assert_eq!(source, recon);
    }

    #[test]
    fn identity_holds_for_extreme_blocks() {
        let mut kernel = identity_kernel();

        for fill in [0_i32, 255, 4095, 65535] {
            let source = [fill; 64];
            let mut coeffs = [0_i32; 64];
            let mut recon = [0_i32; 64];

            kernel.forward(&source, &mut coeffs, 0);
            kernel.inverse(&coeffs, &mut recon, 0);
            assert_eq!(source, recon, "fill {fill}");
        }
    }

    #[test]
    fn identity_holds_with_preshift() {
        let mut kernel = LiftingDct::new(IntQuantizer::new(&[1_u16; 64], false), 2, false);

        let source: [i32; 64] = core::array::from_fn(|i| ((i * 37) % 256 << 2) as i32);
        let mut coeffs = [0_i32; 64];
        let mut recon = [0_i32; 64];

        kernel.forward(&source, &mut coeffs, 0);
        kernel.inverse(&coeffs, &mut recon, 0);
        assert_eq!(source, recon);
    }

    #[test]
    fn flat_block_quantizes_to_dc_only() {
        let mut kernel =
            LiftingDct::new(IntQuantizer::new(&crate::quant::DEFAULT_LUMA_QT, false), 0, false);

        let source = [200_i32; 64];
        let mut coeffs = [0_i32; 64];
        kernel.forward(&source, &mut coeffs, 0);

        assert!(coeffs[0] != 0);
        assert!(coeffs[1..].iter().all(|&c| c == 0));
    }
}
