//! Byte sources and sinks.
//!
//! The codec never talks to files or buffers directly, it goes through the
//! [`XtReaderTrait`] and [`XtWriterTrait`] traits defined here. Anything
//! implementing them can back a decode or encode, which is how callers hook
//! their own transports into the library.
//!
//! [`XtReader`] and [`XtWriter`] wrap an implementation and add the endian
//! aware helpers the marker layer needs.

mod reader;
mod traits;
mod writer;

pub use reader::{XtCursor, XtReader};
pub use traits::{XtReaderTrait, XtWriterTrait};
pub use writer::XtWriter;

use core::fmt::Formatter;

/// Methods of seeking within an I/O source.
///
/// Analogous to [`std::io::SeekFrom`], kept separate so that implementations
/// do not have to pull in `std::io`.
#[derive(Copy, PartialEq, Eq, Clone, Debug)]
pub enum XtSeekFrom {
    /// Offset from the start of the stream.
    Start(u64),
    /// Offset from the end of the stream.
    End(i64),
    /// Offset relative to the current position.
    Current(i64)
}

#[cfg(feature = "std")]
impl XtSeekFrom {
    pub(crate) fn to_std_seek(self) -> std::io::SeekFrom {
        match self {
            XtSeekFrom::Start(pos) => std::io::SeekFrom::Start(pos),
            XtSeekFrom::End(pos) => std::io::SeekFrom::End(pos),
            XtSeekFrom::Current(pos) => std::io::SeekFrom::Current(pos)
        }
    }
}

/// Errors produced by byte sources and sinks.
pub enum XtIoError {
    /// An underlying standard library error.
    #[cfg(feature = "std")]
    StdIoError(std::io::Error),
    /// Conversion between integer widths failed.
    TryFromIntError(core::num::TryFromIntError),
    /// Not enough bytes to satisfy a read, `(found, requested)`.
    NotEnoughBytes(usize, usize),
    /// The sink cannot take more bytes, `(requested, capacity)`.
    NotEnoughBuffer(usize, usize),
    /// Any other error.
    Generic(&'static str),
    /// A seek could not be carried out.
    SeekError(&'static str)
}

impl core::fmt::Debug for XtIoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            #[cfg(feature = "std")]
            XtIoError::StdIoError(err) => {
                write!(f, "underlying I/O error: {err}")
            }
            XtIoError::TryFromIntError(err) => {
                write!(f, "integer conversion failed: {err}")
            }
            XtIoError::NotEnoughBytes(found, expected) => {
                write!(f, "not enough bytes, expected {expected} but found {found}")
            }
            XtIoError::NotEnoughBuffer(expected, found) => {
                write!(
                    f,
                    "not enough buffer to write {expected} bytes, capacity is {found}"
                )
            }
            XtIoError::Generic(err) => {
                write!(f, "I/O error: {err}")
            }
            XtIoError::SeekError(err) => {
                write!(f, "seek error: {err}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for XtIoError {
    fn from(value: std::io::Error) -> Self {
        XtIoError::StdIoError(value)
    }
}

impl From<core::num::TryFromIntError> for XtIoError {
    fn from(value: core::num::TryFromIntError) -> Self {
        XtIoError::TryFromIntError(value)
    }
}

impl From<&'static str> for XtIoError {
    fn from(value: &'static str) -> Self {
        XtIoError::Generic(value)
    }
}
