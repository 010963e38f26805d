//! Decoder and encoder configuration.
//!
//! Options are plain structs with builder style setters. They are validated
//! when a codec instance is constructed, not when they are set, so a
//! configuration can be assembled freely and reused.

mod decoder;
mod encoder;

pub use decoder::{DecoderOptions, StopPoint};
pub use encoder::{
    ColorTransformKind, EncoderOptions, FrameFlags, FrameKind, ScanSpec, ToneMapSpec
};
