//! The reader and writer contracts.
//!
//! These traits are the hook surface of the codec. A decoder is generic over
//! [`XtReaderTrait`], an encoder over [`XtWriterTrait`]; the implementor owns
//! whatever state it needs, playing the role the user-data pointer plays in a
//! C style callback API.

use crate::bytestream::{XtIoError, XtSeekFrom};

/// A pull source of bytes.
///
/// Implementations should mark the small methods `#[inline(always)]`, the
/// call sites sit in the entropy decoding hot loop.
pub trait XtReaderTrait {
    /// Read exactly `buf.len()` bytes or fail with
    /// [`XtIoError::NotEnoughBytes`].
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError>;

    /// Read up to `buf.len()` bytes, returning how many were read.
    ///
    /// Zero means end of stream.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, XtIoError>;

    /// Read a single byte, returning `0` at end of stream.
    ///
    /// The entropy layer depends on this: JPEG bit buffers are allowed to
    /// run into zero padding past the end of a segment.
    fn read_byte_no_error(&mut self) -> u8;

    /// Fill `buf` without advancing the read position.
    fn peek_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError>;

    /// Move the read position.
    ///
    /// Implementations over non-seekable transports may emulate forward
    /// seeks by reading and discarding, and must support backward seeks of
    /// at least two bytes (the marker finder rewinds that much).
    fn seek_from(&mut self, from: XtSeekFrom) -> Result<u64, XtIoError>;

    /// Current position from the start of the stream.
    fn position(&mut self) -> Result<u64, XtIoError>;

    /// True when no more bytes can be produced.
    fn is_eof(&mut self) -> Result<bool, XtIoError>;
}

/// A push sink of bytes. Append only.
pub trait XtWriterTrait {
    /// Write up to `buf.len()` bytes, returning how many were taken.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize, XtIoError>;

    /// Write all of `buf` or fail.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<(), XtIoError>;

    /// Write a fixed-size array, the common case for marker bytes.
    fn write_const_bytes<const N: usize>(&mut self, buf: &[u8; N]) -> Result<(), XtIoError>;

    /// Hint that `additional` bytes are coming. Allowed to do nothing.
    fn pre_allocate_hint(&mut self, additional: usize) -> Result<(), XtIoError>;

    /// Flush buffered bytes to the transport.
    fn flush_bytes(&mut self) -> Result<(), XtIoError>;
}

impl XtWriterTrait for Vec<u8> {
    #[inline(always)]
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize, XtIoError> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[inline(always)]
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<(), XtIoError> {
        self.extend_from_slice(buf);
        Ok(())
    }

    #[inline(always)]
    fn write_const_bytes<const N: usize>(&mut self, buf: &[u8; N]) -> Result<(), XtIoError> {
        self.extend_from_slice(buf);
        Ok(())
    }

    fn pre_allocate_hint(&mut self, additional: usize) -> Result<(), XtIoError> {
        self.try_reserve(additional)
            .map_err(|_| XtIoError::Generic("allocation failure"))
    }

    fn flush_bytes(&mut self) -> Result<(), XtIoError> {
        Ok(())
    }
}

impl<T: XtWriterTrait> XtWriterTrait for &mut T {
    #[inline(always)]
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize, XtIoError> {
        (**self).write_bytes(buf)
    }

    #[inline(always)]
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<(), XtIoError> {
        (**self).write_all_bytes(buf)
    }

    #[inline(always)]
    fn write_const_bytes<const N: usize>(&mut self, buf: &[u8; N]) -> Result<(), XtIoError> {
        (**self).write_const_bytes(buf)
    }

    fn pre_allocate_hint(&mut self, additional: usize) -> Result<(), XtIoError> {
        (**self).pre_allocate_hint(additional)
    }

    fn flush_bytes(&mut self) -> Result<(), XtIoError> {
        (**self).flush_bytes()
    }
}

#[cfg(feature = "std")]
impl<W: std::io::Write> XtWriterTrait for std::io::BufWriter<W> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize, XtIoError> {
        std::io::Write::write(self, buf).map_err(XtIoError::from)
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<(), XtIoError> {
        std::io::Write::write_all(self, buf).map_err(XtIoError::from)
    }

    fn write_const_bytes<const N: usize>(&mut self, buf: &[u8; N]) -> Result<(), XtIoError> {
        self.write_all_bytes(buf)
    }

    fn pre_allocate_hint(&mut self, _additional: usize) -> Result<(), XtIoError> {
        Ok(())
    }

    fn flush_bytes(&mut self) -> Result<(), XtIoError> {
        std::io::Write::flush(self).map_err(XtIoError::from)
    }
}
