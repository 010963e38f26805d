//! A JPEG (ITU-T T.81) and JPEG XT (ISO/IEC 18477) encoder and decoder.
//!
//! The crate covers the classic DCT processes (baseline, extended
//! sequential and progressive, with either Huffman or arithmetic entropy
//! coding), the predictive lossless process, and the XT extension layers
//! that ride on top of a legacy base stream: a reversible integer DCT,
//! hidden coefficient refinement bits, tone mapped HDR reconstruction and
//! a residual codestream that makes the decode bit exact.
//!
//! # Decoding
//!
//! ```no_run
//! use jxt::JxtDecoder;
//!
//! let data = std::fs::read("image.jpg").unwrap();
//! let mut decoder = JxtDecoder::from_vec(data);
//! let pixels = decoder.decode().unwrap();
//! ```
//!
//! # Encoding
//!
//! ```
//! use jxt_core::colorspace::ColorSpace;
//! use jxt_core::options::EncoderOptions;
//! use jxt::JxtEncoder;
//!
//! let pixels = vec![128u8; 16 * 16];
//! let options = EncoderOptions::new(16, 16, ColorSpace::Luma, 8);
//! let bytes = JxtEncoder::new(&pixels, options).encode_to_vec().unwrap();
//! assert_eq!(&bytes[..2], &[0xff, 0xd8]);
//! ```
//!
//! Decoding runs cooperatively: [`JxtDecoder::advance`] performs one step
//! bounded by the configured stop point and the instance keeps all state
//! between calls, so a caller can interleave decoding with its own work.
#![warn(
    clippy::correctness,
    clippy::perf,
    clippy::pedantic,
    clippy::inline_always
)]
#![allow(
    clippy::needless_return,
    clippy::similar_names,
    clippy::inline_always,
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

pub use jxt_core::colorspace::ColorSpace;
pub use jxt_core::options::{
    ColorTransformKind, DecoderOptions, EncoderOptions, FrameFlags, FrameKind, ScanSpec,
    StopPoint, ToneMapSpec
};

pub use crate::decoder::{DecodeProgress, ImageInfo, JxtDecoder, Pixels};
pub use crate::encoder::JxtEncoder;
pub use crate::errors::{DecodeErrors, EncodeErrors};

mod arith;
mod bitstream;
mod color_convert;
mod components;
mod dct;
mod decoder;
mod encoder;
pub mod errors;
mod headers;
mod huffman;
mod lossless;
mod marker;
mod mcu;
mod misc;
mod quant;
mod residual;
mod scan_encode;
mod tonemap;
mod upsampler;
mod worker;
