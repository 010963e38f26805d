//! Per-component state extracted from the frame header.

use jxt_core::log::trace;

use crate::errors::DecodeErrors;
use crate::misc::MAX_COMPONENTS;

/// Conventional component roles; anything beyond three channels is kept by
/// its index.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum ComponentID {
    /// Luminance.
    Y,
    /// Blue chrominance.
    Cb,
    /// Red chrominance.
    Cr,
    /// Any other channel.
    Other(u8)
}

/// One image component and the coding state attached to it.
#[derive(Clone)]
pub(crate) struct Component {
    /// Conventional role of this component.
    pub component_id:      ComponentID,
    /// Identifier byte from the frame header, referenced by scan headers.
    pub id:                u8,
    /// Horizontal sampling factor, `1..=4`.
    pub horizontal_sample: usize,
    /// Vertical sampling factor, `1..=4`.
    pub vertical_sample:   usize,
    /// Quantization table slot used by this component.
    pub quant_table_slot:  u8,
    /// DC (or lossless) entropy table slot, from the scan header.
    pub dc_table_slot:     usize,
    /// AC entropy table slot, from the scan header.
    pub ac_table_slot:     usize,
    /// DC predictor, reset at scan starts and restart markers.
    pub dc_pred:           i32,
    /// Width of this component's pixel grid.
    pub width:             usize,
    /// Height of this component's pixel grid.
    pub height:            usize,
    /// Samples per row in the component plane, padded to whole blocks.
    pub width_stride:      usize,
    /// Rows in the component plane, padded to whole blocks.
    pub height_stride:     usize,
    /// Decoded (or to-be-encoded) plane samples at component resolution.
    pub samples:           Vec<u16>,
    /// Quantized coefficients for the whole plane, kept while scans still
    /// revisit them (progressive, hidden refinement, optimization).
    pub coeffs:            Vec<i32>
}

impl Component {
    /// Build a component from the three bytes of a frame header entry.
    pub fn from_sof_bytes(bytes: [u8; 3], position: u8) -> Result<Component, DecodeErrors> {
        let id = bytes[0];
        let component_id = match (id, position) {
            (1, _) | (_, 0) => ComponentID::Y,
            (2, _) | (_, 1) => ComponentID::Cb,
            (3, _) | (_, 2) => ComponentID::Cr,
            _ => ComponentID::Other(id)
        };

        let horizontal_sample = usize::from(bytes[1] >> 4);
        let vertical_sample = usize::from(bytes[1] & 0x0f);
        let quant_table_slot = bytes[2];

        if !(1..=4).contains(&horizontal_sample) {
            return Err(DecodeErrors::SofError(format!(
                "horizontal sampling factor {horizontal_sample} out of range 1..=4"
            )));
        }
        if !(1..=4).contains(&vertical_sample) {
            return Err(DecodeErrors::SofError(format!(
                "vertical sampling factor {vertical_sample} out of range 1..=4"
            )));
        }
        if usize::from(quant_table_slot) >= MAX_COMPONENTS {
            return Err(DecodeErrors::SofError(format!(
                "quantization table slot {quant_table_slot} out of range 0..=3"
            )));
        }

        trace!("component id={id} h={horizontal_sample} v={vertical_sample} q={quant_table_slot}");

        Ok(Component {
            component_id,
            id,
            horizontal_sample,
            vertical_sample,
            quant_table_slot,
            // assigned by the scan header
            dc_table_slot: 0,
            ac_table_slot: 0,
            dc_pred: 0,
            width: 0,
            height: 0,
            width_stride: horizontal_sample,
            height_stride: 0,
            samples: vec![],
            coeffs: vec![]
        })
    }

    /// Number of blocks per row of this component's plane.
    pub fn blocks_per_row(&self) -> usize {
        self.width_stride / 8
    }
}
