//! Error types reported by the decoder and encoder.
//!
//! Every failure is recoverable from the caller's point of view: the codec
//! releases what it holds and hands back one of these. The scan level
//! recovery tricks (zero filling a truncated block, resynchronizing on a
//! restart marker) happen below this layer and never surface here unless
//! strict mode is on.

use core::fmt::{Debug, Display, Formatter};
use std::error::Error;

use jxt_core::bytestream::XtIoError;

use crate::marker::Marker;

/// Errors that may arise when decoding a codestream.
pub enum DecodeErrors {
    /// The stream does not begin with SOI.
    NoJpeg(u16),
    /// A unique marker (SOI, EOI, SOF) appeared twice.
    DoubleMarker(Marker),
    /// The stream ended inside a required segment.
    UnexpectedEof,
    /// Segment contents disagree with the declared length, a required
    /// marker is missing, or a reserved marker appeared.
    MalformedStream(String),
    /// Same as [`Self::MalformedStream`] without an allocation.
    MalformedStreamStatic(&'static str),
    /// A Huffman table is invalid or a decode read 16 bits without a match.
    InvalidHuffman(String),
    /// Problems in a DQT segment.
    DqtError(String),
    /// Problems in a SOF segment.
    SofError(String),
    /// Problems in a SOS segment.
    SosError(String),
    /// User supplied configuration that is out of range.
    InvalidParameter(String),
    /// A numeric parameter exceeds its bit width.
    Overflow(&'static str),
    /// Legal JPEG that the supported profiles exclude.
    NotInProfile(&'static str),
    /// A buffer could not be grown to the required size.
    OutOfMemory(usize),
    /// The underlying byte source failed.
    IoError(XtIoError)
}

impl Display for DecodeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoJpeg(bytes) => {
                write!(f, "not a jpeg stream, no SOI, first bytes {bytes:#06x}")
            }
            Self::DoubleMarker(marker) => {
                write!(f, "unique marker {marker:?} appeared twice")
            }
            Self::UnexpectedEof => {
                write!(f, "stream ended inside a required segment")
            }
            Self::MalformedStream(reason) => {
                write!(f, "malformed stream: {reason}")
            }
            Self::MalformedStreamStatic(reason) => {
                write!(f, "malformed stream: {reason}")
            }
            Self::InvalidHuffman(reason) => {
                write!(f, "invalid huffman data: {reason}")
            }
            Self::DqtError(reason) => {
                write!(f, "error parsing DQT segment: {reason}")
            }
            Self::SofError(reason) => {
                write!(f, "error parsing SOF segment: {reason}")
            }
            Self::SosError(reason) => {
                write!(f, "error parsing SOS segment: {reason}")
            }
            Self::InvalidParameter(reason) => {
                write!(f, "invalid parameter: {reason}")
            }
            Self::Overflow(reason) => {
                write!(f, "parameter overflow: {reason}")
            }
            Self::NotInProfile(reason) => {
                write!(f, "stream not in a supported profile: {reason}")
            }
            Self::OutOfMemory(bytes) => {
                write!(f, "could not allocate {bytes} bytes")
            }
            Self::IoError(err) => {
                write!(f, "I/O error: {err:?}")
            }
        }
    }
}

impl Debug for DecodeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Error for DecodeErrors {}

impl From<XtIoError> for DecodeErrors {
    fn from(value: XtIoError) -> Self {
        match value {
            XtIoError::NotEnoughBytes(..) => DecodeErrors::UnexpectedEof,
            other => DecodeErrors::IoError(other)
        }
    }
}

/// Errors that may arise when encoding an image.
pub enum EncodeErrors {
    /// User supplied configuration that is out of range.
    InvalidParameter(String),
    /// A numeric parameter exceeds its bit width.
    Overflow(&'static str),
    /// The configured combination is legal JPEG but outside the supported
    /// profiles.
    NotInProfile(&'static str),
    /// The measurement pass and the emission pass disagreed, an internal
    /// bug.
    PhaseError(&'static str),
    /// The supplied pixel buffer does not match the configured dimensions,
    /// `(expected, found)`.
    LengthMismatch(usize, usize),
    /// The underlying byte sink failed.
    IoError(XtIoError)
}

impl Display for EncodeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidParameter(reason) => {
                write!(f, "invalid parameter: {reason}")
            }
            Self::Overflow(reason) => {
                write!(f, "parameter overflow: {reason}")
            }
            Self::NotInProfile(reason) => {
                write!(f, "configuration outside supported profiles: {reason}")
            }
            Self::PhaseError(reason) => {
                write!(f, "measurement pass inconsistent with output pass: {reason}")
            }
            Self::LengthMismatch(expected, found) => {
                write!(f, "expected a pixel buffer of {expected} samples, found {found}")
            }
            Self::IoError(err) => {
                write!(f, "I/O error: {err:?}")
            }
        }
    }
}

impl Debug for EncodeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Error for EncodeErrors {}

impl From<XtIoError> for EncodeErrors {
    fn from(value: XtIoError) -> Self {
        EncodeErrors::IoError(value)
    }
}
