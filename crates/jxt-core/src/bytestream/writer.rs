use crate::bytestream::{XtIoError, XtWriterTrait};

/// Wraps an [`XtWriterTrait`] implementation with endian aware helpers.
///
/// The stream is append only; the encoder builds segments in memory when it
/// needs to patch lengths after the fact.
pub struct XtWriter<T: XtWriterTrait> {
    buffer:        T,
    bytes_written: usize
}

impl<T: XtWriterTrait> XtWriter<T> {
    pub fn new(sink: T) -> XtWriter<T> {
        XtWriter {
            buffer:        sink,
            bytes_written: 0
        }
    }

    /// Write some bytes, returning how many were taken.
    #[inline]
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, XtIoError> {
        let bytes_written = self.buffer.write_bytes(buf)?;
        self.bytes_written += bytes_written;
        Ok(bytes_written)
    }

    /// Write all of `buf` or fail.
    #[inline]
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), XtIoError> {
        self.buffer.write_all_bytes(buf)?;
        self.bytes_written += buf.len();
        Ok(())
    }

    #[inline]
    pub fn write_const_bytes<const N: usize>(&mut self, buf: &[u8; N]) -> Result<(), XtIoError> {
        self.buffer.write_const_bytes(buf)?;
        self.bytes_written += N;
        Ok(())
    }

    /// Write a single byte.
    #[inline(always)]
    pub fn write_u8(&mut self, byte: u8) -> Result<(), XtIoError> {
        self.write_const_bytes(&[byte])
    }

    /// Write a big-endian u16, the layout of every marker and segment
    /// length in the codestream.
    #[inline]
    pub fn write_u16_be(&mut self, value: u16) -> Result<(), XtIoError> {
        self.write_const_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian u32.
    #[inline]
    pub fn write_u32_be(&mut self, value: u32) -> Result<(), XtIoError> {
        self.write_const_bytes(&value.to_be_bytes())
    }

    /// Total bytes pushed through this writer.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn reserve(&mut self, additional: usize) -> Result<(), XtIoError> {
        self.buffer.pre_allocate_hint(additional)
    }

    pub fn flush(&mut self) -> Result<(), XtIoError> {
        self.buffer.flush_bytes()
    }

    /// Destroy the writer, returning the underlying sink.
    pub fn inner(self) -> T {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bytes_written() {
        let mut sink = vec![];
        let mut writer = XtWriter::new(&mut sink);

        writer.write_u16_be(0xffd8).unwrap();
        writer.write_u8(0x12).unwrap();

        assert_eq!(writer.bytes_written(), 3);
        assert_eq!(sink, &[0xff, 0xd8, 0x12]);
    }
}
