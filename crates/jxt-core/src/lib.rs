//! Core primitives shared by the `jxt` JPEG XT codec crates.
//!
//! This crate carries the pieces that are not specific to the JPEG
//! codestream itself:
//!
//! - [`bytestream`]: trait based byte sources and sinks with endian aware
//!   helpers. The traits double as the I/O hook of the codec, any type
//!   implementing them can back a decoder or encoder.
//! - [`options`]: decoder and encoder configuration surfaces.
//! - [`colorspace`]: pixel colorspaces the codec understands.
//! - [`sample`]: sample formats for bitmap windows, including portable
//!   half-float conversion.
//!
//! It is kept deliberately small so that the codec crate remains the only
//! place with knowledge of the wire format.
#![warn(clippy::correctness, clippy::perf, clippy::pedantic)]
#![allow(
    clippy::needless_return,
    clippy::similar_names,
    clippy::inline_always,
    clippy::doc_markdown,
    clippy::module_name_repetitions
)]

pub mod bytestream;
pub mod colorspace;
pub mod log;
pub mod options;
pub mod sample;
