//! Bit level access to entropy coded segments.
//!
//! [`BitStream`] pulls bits out of a scan, unstuffing the `0x00` byte that
//! follows every `0xFF` and capturing any marker it runs into; once a
//! marker (or the end of the stream) is hit the stream keeps feeding zero
//! bits so a truncated block decodes as trailing zero coefficients.
//!
//! [`BitWriter`] is the mirror image: an MSB-first accumulator that stuffs
//! a `0x00` after every `0xFF` it emits and pads the tail of a scan with
//! one bits.

use jxt_core::bytestream::{XtIoError, XtReader, XtReaderTrait, XtWriter, XtWriterTrait};

use crate::errors::DecodeErrors;
use crate::huffman::{huff_extend, HuffmanTable, HUFF_LOOKAHEAD};
use crate::marker::Marker;
use crate::misc::UN_ZIGZAG;

/// Reads bits from entropy coded data.
pub(crate) struct BitStream {
    /// Pending bits, aligned so the next bit is bit 63.
    buffer:          u64,
    /// Number of valid bits in `buffer`.
    pub bits_left:   u8,
    /// Marker encountered while refilling, left for the scan driver.
    pub marker:      Option<Marker>,
    /// Bytes of zero padding fed after the data ran out.
    pub overread_by: usize,
    /// Successive approximation high bit of the current scan.
    pub succ_high:   u8,
    /// Successive approximation low bit of the current scan.
    pub succ_low:    u8,
    /// Spectral band of the current scan.
    pub spec_start:  u8,
    pub spec_end:    u8,
    /// Remaining end-of-band run, progressive AC scans only.
    pub eob_run:     u32
}

impl BitStream {
    pub const fn new() -> BitStream {
        BitStream {
            buffer:      0,
            bits_left:   0,
            marker:      None,
            overread_by: 0,
            succ_high:   0,
            succ_low:    0,
            spec_start:  0,
            spec_end:    63,
            eob_run:     0
        }
    }

    /// Carry the parameters of a new scan into the stream state.
    pub fn set_scan_params(&mut self, ss: u8, se: u8, ah: u8, al: u8) {
        self.spec_start = ss;
        self.spec_end = se;
        self.succ_high = ah;
        self.succ_low = al;
        self.eob_run = 0;
    }

    /// Top up the bit buffer to at least 32 bits where the stream allows.
    ///
    /// Stops feeding real bytes at a marker; from then on the buffer is
    /// extended with zeroes and `overread_by` counts how far past the data
    /// we ran.
    #[inline(always)]
    fn refill<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) {
        while self.bits_left <= 56 - 8 {
            if self.marker.is_some() {
                // zero fill after a marker, the scan driver will stop us
                self.overread_by += 1;
                self.bits_left += 8;
                continue;
            }

            let mut byte = reader.read_u8();

            if byte == 0xff {
                let mut next = reader.read_u8();
                // fill bytes before a marker are legal
                while next == 0xff {
                    next = reader.read_u8();
                }

                if next != 0x00 {
                    // a real marker; do not consume it, the driver re-reads
                    // it through the normal marker path
                    match Marker::from_u8(next) {
                        Some(m) => self.marker = Some(m),
                        None => self.marker = Some(Marker::EOI)
                    }
                    self.overread_by += 1;
                    self.bits_left += 8;
                    continue;
                }
                // 0xFF00 is a stuffed data byte
                byte = 0xff;
            }

            self.buffer |= u64::from(byte) << (56 - self.bits_left);
            self.bits_left += 8;
        }
    }

    /// Look at the next `n` bits without consuming them.
    #[inline(always)]
    fn peek_bits(&self, n: u8) -> u32 {
        (self.buffer >> (64 - u32::from(n))) as u32
    }

    #[inline(always)]
    fn drop_bits(&mut self, n: u8) {
        self.buffer <<= n;
        self.bits_left -= n;
    }

    /// Read and consume `n` bits, `n` in `1..=32`.
    #[inline(always)]
    fn get_bits<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>, n: u8) -> u32 {
        if self.bits_left < n {
            self.refill(reader);
        }
        let bits = self.peek_bits(n);
        self.drop_bits(n);
        bits
    }

    /// Read a single bit, refinement passes live on this.
    #[inline(always)]
    pub fn get_bit<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) -> u32 {
        self.get_bits(reader, 1)
    }

    /// Decode one Huffman symbol.
    #[inline(always)]
    pub fn decode_symbol<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, table: &HuffmanTable
    ) -> Result<u8, DecodeErrors> {
        if self.bits_left < 16 {
            self.refill(reader);
        }

        let entry = table.lookup[self.peek_bits(HUFF_LOOKAHEAD) as usize];

        if entry != 0 {
            let length = (entry >> HUFF_LOOKAHEAD) as u8;
            self.drop_bits(length);
            return Ok((entry & ((1 << HUFF_LOOKAHEAD) - 1)) as u8);
        }

        // codes longer than the lookahead window, Figure F.16
        let code16 = self.peek_bits(16) as i32;
        for length in (usize::from(HUFF_LOOKAHEAD) + 1)..=16 {
            let code = code16 >> (16 - length);
            if code <= table.maxcode[length] {
                self.drop_bits(length as u8);
                let index = ((code + table.offset[length]) & 0xff) as usize;
                return Ok(table.values[index]);
            }
        }

        Err(DecodeErrors::InvalidHuffman(
            "no huffman code matched in 16 bits".to_string()
        ))
    }

    /// Decode a DC difference and update the predictor.
    #[inline(always)]
    pub fn decode_dc<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, dc_table: &HuffmanTable, dc_pred: &mut i32
    ) -> Result<i32, DecodeErrors> {
        let category = self.decode_symbol(reader, dc_table)?;

        if category > 16 {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "DC category {category} out of range"
            )));
        }

        let diff = if category == 0 {
            0
        } else if category == 16 {
            // 16 bit lossless special case carries no extra bits
            32768
        } else {
            let raw = self.get_bits(reader, category) as i32;
            huff_extend(raw, i32::from(category))
        };

        // predictors live in the modulo 2^16 window of the difference
        // coding
        *dc_pred = ((dc_pred.wrapping_add(diff) + 32768).rem_euclid(65536)) - 32768;
        Ok(diff)
    }

    /// Decode one sequential block into `block` (natural order).
    ///
    /// Returns the number of coefficients touched in zig-zag order, useful
    /// to pick a reduced IDCT.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode_block<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, dc_table: &HuffmanTable, ac_table: &HuffmanTable,
        block: &mut [i32; 64], dc_pred: &mut i32
    ) -> Result<usize, DecodeErrors> {
        self.decode_dc(reader, dc_table, dc_pred)?;
        block[0] = *dc_pred;

        let ac_lookup = ac_table.ac_lookup.as_ref();
        let mut pos = 1_usize;

        while pos < 64 {
            if self.bits_left < 16 {
                self.refill(reader);
            }

            // combined run/value fast path
            if let Some(fast) = ac_lookup {
                let probe = fast[self.peek_bits(HUFF_LOOKAHEAD) as usize];
                if probe != 0 {
                    pos += usize::from((probe as u16 >> 4) & 15);
                    block[UN_ZIGZAG[pos.min(63)] & 63] = i32::from(probe >> 8);
                    self.drop_bits((probe & 15) as u8);
                    pos += 1;
                    continue;
                }
            }

            let symbol = self.decode_symbol(reader, ac_table)?;
            let run = usize::from(symbol >> 4);
            let magnitude = symbol & 0x0f;

            if magnitude != 0 {
                pos += run;
                let raw = self.get_bits(reader, magnitude) as i32;
                block[UN_ZIGZAG[pos.min(79)] & 63] = huff_extend(raw, i32::from(magnitude));
                pos += 1;
            } else if run == 15 {
                // ZRL, sixteen zeroes
                pos += 16;
            } else {
                // EOB, the rest of the block stays zero
                break;
            }
        }

        Ok(pos.min(64))
    }

    /// First DC pass of a progressive scan.
    pub fn decode_dc_first<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, dc_table: &HuffmanTable, block: &mut [i32; 64],
        dc_pred: &mut i32
    ) -> Result<(), DecodeErrors> {
        self.decode_dc(reader, dc_table, dc_pred)?;
        block[0] = *dc_pred << self.succ_low;
        Ok(())
    }

    /// DC refinement pass: one bit per block at position `Al`.
    pub fn decode_dc_refine<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, block: &mut [i32; 64]
    ) -> Result<(), DecodeErrors> {
        if self.get_bit(reader) == 1 {
            block[0] |= 1 << self.succ_low;
        }
        Ok(())
    }

    /// First AC pass of a progressive scan, band `[Ss, Se]`.
    pub fn decode_ac_first<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, ac_table: &HuffmanTable, block: &mut [i32; 64]
    ) -> Result<(), DecodeErrors> {
        if self.eob_run > 0 {
            self.eob_run -= 1;
            return Ok(());
        }

        let shift = self.succ_low;
        let mut pos = usize::from(self.spec_start);

        while pos <= usize::from(self.spec_end) {
            let symbol = self.decode_symbol(reader, ac_table)?;
            let run = u32::from(symbol >> 4);
            let magnitude = symbol & 0x0f;

            if magnitude != 0 {
                pos += run as usize;
                let raw = self.get_bits(reader, magnitude) as i32;
                block[UN_ZIGZAG[pos.min(79)] & 63] =
                    huff_extend(raw, i32::from(magnitude)) << shift;
                pos += 1;
            } else if run == 15 {
                pos += 16;
            } else {
                // EOBn, run length 2^run - 1 more blocks after this one
                self.eob_run = (1 << run) - 1;
                if run > 0 {
                    self.eob_run += self.get_bits(reader, run as u8);
                }
                break;
            }
        }
        Ok(())
    }

    /// AC refinement pass, Section G.1.2.3 with the correction-bit rules.
    pub fn decode_ac_refine<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, ac_table: &HuffmanTable, block: &mut [i32; 64]
    ) -> Result<(), DecodeErrors> {
        let bit = 1_i32 << self.succ_low;
        let start = usize::from(self.spec_start);
        let end = usize::from(self.spec_end);

        let mut pos = start;

        if self.eob_run == 0 {
            while pos <= end {
                let symbol = self.decode_symbol(reader, ac_table)?;
                let mut run = i32::from(symbol >> 4);
                let magnitude = symbol & 0x0f;
                let mut value = 0_i32;

                match magnitude {
                    0 => {
                        if run != 15 {
                            // EOBn
                            self.eob_run = (1 << run) - 1;
                            if run > 0 {
                                self.eob_run += self.get_bits(reader, run as u8);
                            }
                            break;
                        }
                        // ZRL: skip 16 zero-history coefficients
                    }
                    1 => {
                        // newly significant coefficient, sign bit follows
                        value = if self.get_bit(reader) == 1 { bit } else { -bit };
                    }
                    _ => {
                        return Err(DecodeErrors::InvalidHuffman(
                            "bad magnitude in AC refinement scan".to_string()
                        ));
                    }
                }

                // advance over `run` zero-history coefficients, emitting
                // correction bits for already-nonzero ones passed on the way
                while pos <= end {
                    let coeff = &mut block[UN_ZIGZAG[pos] & 63];

                    if *coeff != 0 {
                        if self.get_bit(reader) == 1 && (*coeff & bit) == 0 {
                            if *coeff >= 0 {
                                *coeff += bit;
                            } else {
                                *coeff -= bit;
                            }
                        }
                    } else {
                        if run == 0 {
                            if value != 0 {
                                *coeff = value;
                            }
                            pos += 1;
                            break;
                        }
                        run -= 1;
                    }
                    pos += 1;
                }
            }
        }

        if self.eob_run > 0 {
            // finish the band applying correction bits only
            while pos <= end {
                let coeff = &mut block[UN_ZIGZAG[pos] & 63];
                if *coeff != 0 && self.get_bit(reader) == 1 && (*coeff & bit) == 0 {
                    if *coeff >= 0 {
                        *coeff += bit;
                    } else {
                        *coeff -= bit;
                    }
                }
                pos += 1;
            }
            self.eob_run -= 1;
        }

        Ok(())
    }

    /// Reset after a restart marker: bit buffer emptied, marker cleared.
    #[cold]
    pub fn reset(&mut self) {
        self.bits_left = 0;
        self.buffer = 0;
        self.marker = None;
        self.overread_by = 0;
        self.eob_run = 0;
    }

    /// True when decoding has been running on zero fill for a while, the
    /// sign of a truncated scan rather than an ordinary end-of-scan
    /// refill overshoot.
    pub fn saw_premature_end(&self) -> bool {
        self.overread_by > 32
    }

    /// Refill until the terminating marker of the segment is visible.
    ///
    /// Discards the padding bits before the marker. Returns `false` when
    /// the byte source ran dry without one.
    pub fn sync_to_marker<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) -> bool {
        for _ in 0..4096 {
            if self.marker.is_some() {
                return true;
            }
            self.bits_left = 0;
            self.buffer = 0;
            self.refill(reader);
            if self.marker.is_none() && reader.eof().unwrap_or(true) {
                return false;
            }
        }
        false
    }
}

/// Writes entropy coded data, MSB first, with byte stuffing.
pub(crate) struct BitWriter<'a, T: XtWriterTrait> {
    dest:    &'a mut XtWriter<T>,
    buffer:  u64,
    bits_in: u8
}

impl<'a, T: XtWriterTrait> BitWriter<'a, T> {
    pub fn new(dest: &'a mut XtWriter<T>) -> BitWriter<'a, T> {
        BitWriter {
            dest,
            buffer: 0,
            bits_in: 0
        }
    }

    /// Append `size` bits of `code`, `size <= 24`.
    #[inline(always)]
    pub fn put_bits(&mut self, code: u32, size: u8) -> Result<(), XtIoError> {
        debug_assert!(size <= 24);

        self.buffer = (self.buffer << size) | u64::from(code & ((1 << size) - 1));
        self.bits_in += size;

        while self.bits_in >= 8 {
            let byte = ((self.buffer >> (self.bits_in - 8)) & 0xff) as u8;
            self.dest.write_u8(byte)?;
            if byte == 0xff {
                // stuffing byte keeps data distinguishable from markers
                self.dest.write_u8(0x00)?;
            }
            self.bits_in -= 8;
        }
        Ok(())
    }

    /// Pad the remaining bits with ones and flush, the end-of-scan rule.
    pub fn flush_with_ones(&mut self) -> Result<(), XtIoError> {
        let pad = (8 - self.bits_in % 8) % 8;
        if pad > 0 {
            self.put_bits((1 << pad) - 1, pad)?;
        }
        Ok(())
    }

    /// Align and emit a restart marker, `m` cycling `0..=7`.
    pub fn write_restart(&mut self, counter: usize) -> Result<(), XtIoError> {
        self.flush_with_ones()?;
        self.dest.write_u8(0xff)?;
        self.dest.write_u8(0xd0 + (counter % 8) as u8)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jxt_core::bytestream::{XtCursor, XtReader, XtWriter};

    use super::*;

    #[test]
    fn writer_stuffs_ff_bytes() {
        let mut sink = vec![];
        {
            let mut writer = XtWriter::new(&mut sink);
            let mut bits = BitWriter::new(&mut writer);
            bits.put_bits(0xff, 8).unwrap();
            bits.put_bits(0x12, 8).unwrap();
            bits.flush_with_ones().unwrap();
        }
        assert_eq!(sink, &[0xff, 0x00, 0x12]);
    }

    #[test]
    fn reader_unstuffs_and_finds_markers() {
        // 0xff00 unstuffs to a 0xff data byte, 0xffd9 is EOI
        let data = [0b1010_1010, 0xff, 0x00, 0xff, 0xd9];
        let mut reader = XtReader::new(XtCursor::new(data));
        let mut stream = BitStream::new();

        assert_eq!(stream.get_bits(&mut reader, 8), 0b1010_1010);
        assert_eq!(stream.get_bits(&mut reader, 8), 0xff);
        // the marker is left for the caller, the stream feeds zeroes
        assert_eq!(stream.get_bits(&mut reader, 8), 0);
        assert_eq!(stream.marker, Some(Marker::EOI));
    }

    #[test]
    fn flush_pads_with_ones() {
        let mut sink = vec![];
        {
            let mut writer = XtWriter::new(&mut sink);
            let mut bits = BitWriter::new(&mut writer);
            bits.put_bits(0b0, 1).unwrap();
            bits.flush_with_ones().unwrap();
        }
        assert_eq!(sink, &[0b0111_1111]);
    }

    #[test]
    fn round_trips_huffman_block() {
        use crate::huffman::{HuffmanEncTable, HuffmanTable};
        use crate::huffman::{
            LUMA_AC_BITS, LUMA_AC_VALUES, LUMA_DC_BITS, LUMA_DC_VALUES
        };

        let dc_enc = HuffmanEncTable::new(&LUMA_DC_BITS, LUMA_DC_VALUES).unwrap();
        let ac_enc = HuffmanEncTable::new(&LUMA_AC_BITS, LUMA_AC_VALUES).unwrap();

        let mut dc_padded = [0_u8; 256];
        dc_padded[..LUMA_DC_VALUES.len()].copy_from_slice(LUMA_DC_VALUES);
        let dc_dec = HuffmanTable::new(&LUMA_DC_BITS, dc_padded, true, false).unwrap();

        let mut ac_padded = [0_u8; 256];
        ac_padded[..LUMA_AC_VALUES.len()].copy_from_slice(LUMA_AC_VALUES);
        let ac_dec = HuffmanTable::new(&LUMA_AC_BITS, ac_padded, false, false).unwrap();

        let mut block = [0_i32; 64];
        block[0] = -31;
        block[UN_ZIGZAG[1]] = 4;
        block[UN_ZIGZAG[5]] = -2;
        block[UN_ZIGZAG[40]] = 1;

        let mut sink = vec![];
        {
            let mut writer = XtWriter::new(&mut sink);
            let mut bits = BitWriter::new(&mut writer);
            let mut dc_pred = 0;
            crate::scan_encode::encode_block_sequential(
                &mut bits, &dc_enc, &ac_enc, &block, &mut dc_pred
            )
            .unwrap();
            bits.flush_with_ones().unwrap();
        }

        let mut reader = XtReader::new(XtCursor::new(sink));
        let mut stream = BitStream::new();
        let mut decoded = [0_i32; 64];
        let mut dc_pred = 0;

        stream
            .decode_block(&mut reader, &dc_dec, &ac_dec, &mut decoded, &mut dc_pred)
            .unwrap();

        assert_eq!(block, decoded);
    }
}
