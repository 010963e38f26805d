use crate::bytestream::{XtIoError, XtReaderTrait, XtSeekFrom};

/// An in-memory byte source over anything that derefs to a byte slice.
///
/// This is the reader the tests and the convenience entry points use; a
/// decode from disk should either memory map or go through the `File`
/// implementation of [`XtReaderTrait`].
pub struct XtCursor<T> {
    inner:    T,
    position: usize
}

impl<T: AsRef<[u8]>> XtCursor<T> {
    pub fn new(inner: T) -> XtCursor<T> {
        XtCursor { inner, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.inner.as_ref().len().saturating_sub(self.position)
    }
}

impl<T: AsRef<[u8]>> XtReaderTrait for XtCursor<T> {
    #[inline(always)]
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError> {
        let bytes = self.inner.as_ref();

        match bytes.get(self.position..self.position + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                self.position += buf.len();
                Ok(())
            }
            None => Err(XtIoError::NotEnoughBytes(self.remaining(), buf.len()))
        }
    }

    #[inline(always)]
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, XtIoError> {
        let bytes = self.inner.as_ref();
        let can_read = buf.len().min(self.remaining());

        buf[..can_read].copy_from_slice(&bytes[self.position..self.position + can_read]);
        self.position += can_read;

        Ok(can_read)
    }

    #[inline(always)]
    fn read_byte_no_error(&mut self) -> u8 {
        let byte = *self.inner.as_ref().get(self.position).unwrap_or(&0);
        // saturate so that repeated over-reads do not wrap
        self.position = self.position.saturating_add(1);
        byte
    }

    #[inline(always)]
    fn peek_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError> {
        let bytes = self.inner.as_ref();

        match bytes.get(self.position..self.position + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                Ok(())
            }
            None => Err(XtIoError::NotEnoughBytes(self.remaining(), buf.len()))
        }
    }

    fn seek_from(&mut self, from: XtSeekFrom) -> Result<u64, XtIoError> {
        let len = self.inner.as_ref().len() as i64;
        let new_pos = match from {
            XtSeekFrom::Start(pos) => i64::try_from(pos)?,
            XtSeekFrom::End(off) => len + off,
            XtSeekFrom::Current(off) => self.position as i64 + off
        };

        if new_pos < 0 {
            return Err(XtIoError::SeekError("seek before start of stream"));
        }
        // seeking past the end is allowed, reads there report EOF
        self.position = new_pos as usize;

        Ok(self.position as u64)
    }

    fn position(&mut self) -> Result<u64, XtIoError> {
        Ok(self.position as u64)
    }

    fn is_eof(&mut self) -> Result<bool, XtIoError> {
        Ok(self.position >= self.inner.as_ref().len())
    }
}

#[cfg(feature = "std")]
impl XtReaderTrait for std::io::BufReader<std::fs::File> {
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError> {
        std::io::Read::read_exact(self, buf).map_err(|_| XtIoError::NotEnoughBytes(0, buf.len()))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, XtIoError> {
        std::io::Read::read(self, buf).map_err(XtIoError::from)
    }

    fn read_byte_no_error(&mut self) -> u8 {
        let mut buf = [0];
        let _ = std::io::Read::read(self, &mut buf);
        buf[0]
    }

    fn peek_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError> {
        let len = buf.len() as i64;
        self.read_exact_bytes(buf)?;
        self.seek_from(XtSeekFrom::Current(-len))?;
        Ok(())
    }

    fn seek_from(&mut self, from: XtSeekFrom) -> Result<u64, XtIoError> {
        // seek_relative avoids dropping the buffer for the small in-buffer
        // rewinds the marker finder does
        if let XtSeekFrom::Current(off) = from {
            std::io::Seek::seek_relative(self, off)?;
            return self.position();
        }
        std::io::Seek::seek(self, from.to_std_seek()).map_err(XtIoError::from)
    }

    fn position(&mut self) -> Result<u64, XtIoError> {
        std::io::Seek::stream_position(self).map_err(XtIoError::from)
    }

    fn is_eof(&mut self) -> Result<bool, XtIoError> {
        let buf = std::io::BufRead::fill_buf(self).map_err(XtIoError::from)?;
        Ok(buf.is_empty())
    }
}

/// Wraps an [`XtReaderTrait`] implementation and adds the endian aware
/// helpers the segment parsers use.
pub struct XtReader<T> {
    inner:       T,
    temp_buffer: Vec<u8>
}

impl<T: XtReaderTrait> XtReader<T> {
    pub fn new(source: T) -> XtReader<T> {
        XtReader {
            inner:       source,
            temp_buffer: vec![]
        }
    }

    /// Destroy the reader, returning the underlying source.
    pub fn consume(self) -> T {
        self.inner
    }

    /// Skip `num` bytes ahead.
    #[inline(always)]
    pub fn skip(&mut self, num: usize) -> Result<u64, XtIoError> {
        self.inner.seek_from(XtSeekFrom::Current(num as i64))
    }

    /// Move back `num` bytes from the current position.
    ///
    /// Rewinds of up to two bytes are always honored, which the marker
    /// finder depends on to push markers back into the stream.
    #[inline(always)]
    pub fn rewind(&mut self, num: usize) -> Result<u64, XtIoError> {
        self.inner.seek_from(XtSeekFrom::Current(-(num as i64)))
    }

    #[inline(always)]
    pub fn seek(&mut self, from: XtSeekFrom) -> Result<u64, XtIoError> {
        self.inner.seek_from(from)
    }

    /// Read a single byte, `0` at end of stream.
    ///
    /// Use [`Self::read_u8_err`] when the zero ambiguity matters.
    #[inline(always)]
    pub fn read_u8(&mut self) -> u8 {
        self.inner.read_byte_no_error()
    }

    /// Read a single byte, failing at end of stream.
    #[inline(always)]
    pub fn read_u8_err(&mut self) -> Result<u8, XtIoError> {
        let mut buf = [0];
        self.inner.read_exact_bytes(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian u16 or fail.
    #[inline]
    pub fn get_u16_be_err(&mut self) -> Result<u16, XtIoError> {
        let mut buf = [0; 2];
        self.inner.read_exact_bytes(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Read a big-endian u16, `0` at end of stream.
    #[inline(always)]
    pub fn get_u16_be(&mut self) -> u16 {
        let mut buf = [0; 2];
        buf[0] = self.inner.read_byte_no_error();
        buf[1] = self.inner.read_byte_no_error();
        u16::from_be_bytes(buf)
    }

    /// Read a big-endian u32 or fail.
    #[inline]
    pub fn get_u32_be_err(&mut self) -> Result<u32, XtIoError> {
        let mut buf = [0; 4];
        self.inner.read_exact_bytes(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Look at `num_bytes` starting `position` bytes ahead without
    /// consuming anything.
    pub fn peek_at(&mut self, position: usize, num_bytes: usize) -> Result<&[u8], XtIoError> {
        if num_bytes > 20 * 1024 * 1024 {
            return Err(XtIoError::Generic("peek request too large"));
        }
        if position != 0 {
            self.skip(position)?;
        }
        self.temp_buffer.resize(num_bytes, 0);

        let outcome = self.inner.peek_exact_bytes(&mut self.temp_buffer[..]);

        if position != 0 {
            self.rewind(position)?;
        }
        outcome.map(|()| &self.temp_buffer[..])
    }

    /// Read a fixed number of bytes or fail.
    #[inline(always)]
    pub fn read_fixed_bytes_or_error<const N: usize>(&mut self) -> Result<[u8; N], XtIoError> {
        let mut bytes = [0; N];
        self.inner.read_exact_bytes(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<(), XtIoError> {
        self.inner.read_exact_bytes(buf)
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, XtIoError> {
        self.inner.read_bytes(buf)
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), XtIoError> {
        self.seek(XtSeekFrom::Start(position as u64))?;
        Ok(())
    }

    pub fn position(&mut self) -> Result<u64, XtIoError> {
        self.inner.position()
    }

    pub fn eof(&mut self) -> Result<bool, XtIoError> {
        self.inner.is_eof()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_and_rewinds() {
        let mut reader = XtReader::new(XtCursor::new([0xff_u8, 0xd8, 0x00, 0x10]));

        assert_eq!(reader.get_u16_be_err().unwrap(), 0xffd8);
        reader.rewind(2).unwrap();
        assert_eq!(reader.get_u16_be_err().unwrap(), 0xffd8);
        assert_eq!(reader.get_u16_be_err().unwrap(), 0x0010);
        assert!(reader.eof().unwrap());
    }

    #[test]
    fn over_read_yields_zero() {
        let mut reader = XtReader::new(XtCursor::new([1_u8]));

        assert_eq!(reader.read_u8(), 1);
        assert_eq!(reader.read_u8(), 0);
        assert!(reader.read_u8_err().is_err());
    }

    #[test]
    fn peek_does_not_advance() {
        let mut reader = XtReader::new(XtCursor::new([1_u8, 2, 3, 4]));

        assert_eq!(reader.peek_at(1, 2).unwrap(), &[2, 3]);
        assert_eq!(reader.read_u8(), 1);
    }
}
