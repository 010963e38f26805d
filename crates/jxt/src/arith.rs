//! The binary arithmetic coder and its JPEG context models.
//!
//! The probability engine is an MQ coder: a 47 row state table of
//! `(Qe, NMPS, NLPS, SWITCH)` driving the usual `A`/`C`/`CT` register
//! discipline with renormalization and carry resolution in the byte-out
//! path. Encoded bytes then pass through the same stuffing rule as the
//! Huffman coder: every `0xFF` data byte is followed by a `0x00`, so a
//! marker scan can never mistake coder output for a marker.
//!
//! On top of the raw coder sit the JPEG conditioning models: DC decisions
//! classified by the previous difference against the `(L, U)` bounds, AC
//! decisions per spectral position with the magnitude banks split at `Kx`.

use jxt_core::bytestream::{XtReader, XtReaderTrait};

use crate::errors::DecodeErrors;
use crate::marker::Marker;

/// `(Qe, NMPS, NLPS, SWITCH)` rows of the state machine.
#[rustfmt::skip]
const STATES: [(u16, u8, u8, bool); 47] = [
    (0x5601,  1,  1, true),
    (0x3401,  2,  6, false),
    (0x1801,  3,  9, false),
    (0x0AC1,  4, 12, false),
    (0x0521,  5, 29, false),
    (0x0221, 38, 33, false),
    (0x5601,  7,  6, true),
    (0x5401,  8, 14, false),
    (0x4801,  9, 14, false),
    (0x3801, 10, 14, false),
    (0x3001, 11, 17, false),
    (0x2401, 12, 18, false),
    (0x1C01, 13, 20, false),
    (0x1601, 29, 21, false),
    (0x5601, 15, 14, true),
    (0x5401, 16, 14, false),
    (0x5101, 17, 15, false),
    (0x4801, 18, 16, false),
    (0x3801, 19, 17, false),
    (0x3401, 20, 18, false),
    (0x3001, 21, 19, false),
    (0x2801, 22, 19, false),
    (0x2401, 23, 20, false),
    (0x2201, 24, 21, false),
    (0x1C01, 25, 22, false),
    (0x1801, 26, 23, false),
    (0x1601, 27, 24, false),
    (0x1401, 28, 25, false),
    (0x1201, 29, 26, false),
    (0x1101, 30, 27, false),
    (0x0AC1, 31, 28, false),
    (0x09C1, 32, 29, false),
    (0x08A1, 33, 30, false),
    (0x0521, 34, 31, false),
    (0x0441, 35, 32, false),
    (0x02A1, 36, 33, false),
    (0x0221, 37, 34, false),
    (0x0141, 38, 35, false),
    (0x0111, 39, 36, false),
    (0x0085, 40, 37, false),
    (0x0049, 41, 38, false),
    (0x0025, 42, 39, false),
    (0x0015, 43, 40, false),
    (0x0009, 44, 41, false),
    (0x0005, 45, 42, false),
    (0x0001, 45, 43, false),
    (0x5601, 46, 46, false)
];

/// The stationary near-half state, used for sign and correction bits that
/// must not adapt.
const FIXED_STATE: u8 = 46;

/// One adaptive binary context.
#[derive(Copy, Clone)]
pub struct Context {
    index: u8,
    mps:   u8
}

impl Default for Context {
    fn default() -> Self {
        Context { index: 0, mps: 0 }
    }
}

impl Context {
    const fn fixed() -> Context {
        Context {
            index: FIXED_STATE,
            mps:   0
        }
    }
}

/// The MQ encoder. Bytes are collected into a scratch buffer so carry
/// resolution is a plain walk backwards; stuffing happens when the
/// segment is copied out.
pub struct ArithEncoder {
    a:     u32,
    c:     u32,
    ct:    i32,
    bytes: Vec<u8>
}

impl ArithEncoder {
    #[must_use]
    pub fn new() -> ArithEncoder {
        ArithEncoder {
            a:     0x8000,
            c:     0,
            ct:    12,
            bytes: vec![]
        }
    }

    /// Encode one decision in an adaptive context.
    pub fn encode(&mut self, context: &mut Context, bit: u8) {
        let (qe, nmps, nlps, switch) = STATES[usize::from(context.index)];
        let qe = u32::from(qe);

        self.a -= qe;

        if bit == context.mps {
            if self.a & 0x8000 != 0 {
                self.c += qe;
                return;
            }
            if self.a < qe {
                // conditional exchange, the MPS takes the small interval
            } else {
                self.c += qe;
            }
            if self.a < qe {
                self.a = qe;
            }
            context.index = nmps;
            self.renormalize();
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if switch {
                context.mps ^= 1;
            }
            context.index = nlps;
            self.renormalize();
        }
    }

    /// Encode a bit at fixed (non adapting) near-even odds.
    pub fn encode_fixed(&mut self, bit: u8) {
        let mut ctx = Context::fixed();
        self.encode(&mut ctx, bit);
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        if self.bytes.last() == Some(&0xff) {
            // carry cannot cross a 0xFF byte; keep one extra bit in C
            self.bytes.push((self.c >> 20) as u8);
            self.c &= 0xf_ffff;
            self.ct = 7;
        } else if self.c < 0x800_0000 {
            self.bytes.push((self.c >> 19) as u8);
            self.c &= 0x7_ffff;
            self.ct = 8;
        } else {
            // resolve the carry into the bytes already emitted
            if let Some(last) = self.bytes.last_mut() {
                *last += 1;
            }
            self.c &= 0x7ff_ffff;
            if self.bytes.last() == Some(&0xff) {
                self.bytes.push((self.c >> 20) as u8);
                self.c &= 0xf_ffff;
                self.ct = 7;
            } else {
                self.bytes.push((self.c >> 19) as u8);
                self.c &= 0x7_ffff;
                self.ct = 8;
            }
        }
    }

    /// Terminate the segment and return its bytes, unstuffed.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        // set as many trailing one bits as the interval allows
        let limit = self.c + self.a;
        self.c |= 0xffff;
        if self.c >= limit {
            self.c -= 0x8000;
        }

        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();

        // trailing 0xFF bytes carry no information
        while self.bytes.last() == Some(&0xff) {
            self.bytes.pop();
        }
        self.bytes
    }
}

impl Default for ArithEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The MQ decoder, reading from the codestream through the stuffing and
/// marker rules of an entropy coded segment.
pub struct ArithDecoder {
    a:  u32,
    c:  u32,
    ct: i32,
    /// Byte most recently fed, for the post-0xFF rule.
    b:  u8,
    /// Marker that ended the segment, if any.
    pub marker: Option<Marker>,
    primed: bool
}

impl ArithDecoder {
    #[must_use]
    pub fn new() -> ArithDecoder {
        ArithDecoder {
            a:      0,
            c:      0,
            ct:     0,
            b:      0,
            marker: None,
            primed: false
        }
    }

    /// Initialize from the first two segment bytes.
    fn prime<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) {
        self.b = self.next_byte(reader);
        self.c = u32::from(self.b) << 16;
        self.byte_in(reader);
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
        self.primed = true;
    }

    /// Pull the next data byte, unstuffing and stopping at markers.
    fn next_byte<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) -> u8 {
        if self.marker.is_some() {
            return 0xff;
        }
        let byte = reader.read_u8();
        if byte != 0xff {
            return byte;
        }
        let next = reader.read_u8();
        if next == 0x00 {
            return 0xff;
        }
        // a marker terminates the segment; the scan driver re-reads it
        self.marker = Marker::from_u8(next).or(Some(Marker::EOI));
        0xff
    }

    fn byte_in<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) {
        if self.b == 0xff && self.marker.is_some() {
            // feed one bits past the end of the segment
            self.c += 0xff00;
            self.ct = 8;
            return;
        }
        if self.b == 0xff {
            let next = self.next_byte(reader);
            if self.marker.is_some() {
                self.c += 0xff00;
                self.ct = 8;
                return;
            }
            self.b = next;
            self.c += u32::from(next) << 9;
            self.ct = 7;
        } else {
            let next = self.next_byte(reader);
            if self.marker.is_some() {
                self.c += 0xff00;
                self.ct = 8;
                return;
            }
            self.b = next;
            self.c += u32::from(next) << 8;
            self.ct = 8;
        }
    }

    #[inline(always)]
    fn chigh(&self) -> u32 {
        (self.c >> 16) & 0xffff
    }

    /// Decode one decision in an adaptive context.
    pub fn decode<T: XtReaderTrait>(
        &mut self, reader: &mut XtReader<T>, context: &mut Context
    ) -> u8 {
        if !self.primed {
            self.prime(reader);
        }

        let (qe, nmps, nlps, switch) = STATES[usize::from(context.index)];
        let qe = u32::from(qe);

        self.a -= qe;

        let bit;
        if self.chigh() < qe {
            if self.a < qe {
                // conditional exchange, this small region codes the MPS
                bit = context.mps;
                context.index = nmps;
            } else {
                bit = context.mps ^ 1;
                if switch {
                    context.mps ^= 1;
                }
                context.index = nlps;
            }
            self.a = qe;
            self.renormalize(reader);
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    bit = context.mps ^ 1;
                    if switch {
                        context.mps ^= 1;
                    }
                    context.index = nlps;
                } else {
                    bit = context.mps;
                    context.index = nmps;
                }
                self.renormalize(reader);
            } else {
                bit = context.mps;
            }
        }
        bit
    }

    /// Decode a bit at fixed near-even odds.
    pub fn decode_fixed<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) -> u8 {
        let mut ctx = Context::fixed();
        self.decode(reader, &mut ctx)
    }

    fn renormalize<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) {
        loop {
            if self.ct == 0 {
                self.byte_in(reader);
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// Read forward until the terminating marker of the segment is
    /// visible, discarding the flush padding before it.
    pub fn sync_to_marker<T: XtReaderTrait>(&mut self, reader: &mut XtReader<T>) -> bool {
        for _ in 0..65536 {
            if self.marker.is_some() {
                return true;
            }
            let _ = self.next_byte(reader);
            if self.marker.is_none() && reader.eof().unwrap_or(true) {
                return false;
            }
        }
        false
    }

    /// Reset for a new restart interval.
    pub fn reset(&mut self) {
        self.a = 0;
        self.c = 0;
        self.ct = 0;
        self.b = 0;
        self.marker = None;
        self.primed = false;
    }
}

impl Default for ArithDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of magnitude category levels kept per model (categories up to
/// 16 bit differences).
const MAG_LEVELS: usize = 17;

/// DC conditioning contexts for one table slot.
#[derive(Clone)]
pub struct DcContexts {
    /// Lower bound derived from `L`: differences at or below are "zero".
    lo: i32,
    /// Upper bound derived from `U`.
    hi: i32,
    /// Per class: zero decision, sign, positive magnitude, negative
    /// magnitude.
    s0: [Context; 5],
    ss: [Context; 5],
    sp: [Context; 5],
    sn: [Context; 5],
    /// Magnitude category tree and magnitude bits, shared by the classes.
    x:  [Context; MAG_LEVELS],
    m:  [Context; MAG_LEVELS]
}

impl DcContexts {
    #[must_use]
    pub fn new(l: u8, u: u8) -> DcContexts {
        DcContexts {
            lo: if l == 0 { 0 } else { 1 << (l - 1) },
            hi: 1 << u,
            s0: [Context::default(); 5],
            ss: [Context::default(); 5],
            sp: [Context::default(); 5],
            sn: [Context::default(); 5],
            x:  [Context::default(); MAG_LEVELS],
            m:  [Context::default(); MAG_LEVELS]
        }
    }

    /// Classify the previous difference into one of the five conditioning
    /// classes.
    fn classify(&self, prev_diff: i32) -> usize {
        if prev_diff.abs() <= self.lo {
            0
        } else if prev_diff > self.hi {
            3
        } else if prev_diff < -self.hi {
            4
        } else if prev_diff > 0 {
            1
        } else {
            2
        }
    }
}

/// AC conditioning contexts for one table slot.
#[derive(Clone)]
pub struct AcContexts {
    /// Band split point.
    kx:  u8,
    /// Per position: end-of-band and significance decisions.
    se:  [Context; 64],
    s0:  [Context; 64],
    x1:  [Context; 64],
    /// Magnitude banks below and above `Kx`.
    xlo: [Context; MAG_LEVELS],
    mlo: [Context; MAG_LEVELS],
    xhi: [Context; MAG_LEVELS],
    mhi: [Context; MAG_LEVELS]
}

impl AcContexts {
    #[must_use]
    pub fn new(kx: u8) -> AcContexts {
        AcContexts {
            kx,
            se: [Context::default(); 64],
            s0: [Context::default(); 64],
            x1: [Context::default(); 64],
            xlo: [Context::default(); MAG_LEVELS],
            mlo: [Context::default(); MAG_LEVELS],
            xhi: [Context::default(); MAG_LEVELS],
            mhi: [Context::default(); MAG_LEVELS]
        }
    }
}

/// Encode the magnitude `sz` (value minus one) through a category tree.
fn encode_magnitude(
    coder: &mut ArithEncoder, first: &mut Context, x: &mut [Context; MAG_LEVELS],
    m: &mut [Context; MAG_LEVELS], sz: u32
) {
    if sz == 0 {
        coder.encode(first, 0);
        return;
    }
    coder.encode(first, 1);

    // category: the number of bits in sz
    let bits = 32 - sz.leading_zeros();
    for level in 1..bits {
        coder.encode(&mut x[level as usize], 1);
    }
    if (bits as usize) < MAG_LEVELS {
        coder.encode(&mut x[bits as usize], 0);
    }

    // the low bits below the leading one, most significant first
    let magnitude = &mut m[(bits as usize).min(MAG_LEVELS - 1)];
    for position in (0..bits - 1).rev() {
        coder.encode(magnitude, ((sz >> position) & 1) as u8);
    }
}

fn decode_magnitude<T: XtReaderTrait>(
    coder: &mut ArithDecoder, reader: &mut XtReader<T>, first: &mut Context,
    x: &mut [Context; MAG_LEVELS], m: &mut [Context; MAG_LEVELS]
) -> Result<u32, DecodeErrors> {
    if coder.decode(reader, first) == 0 {
        return Ok(0);
    }

    let mut bits = 1_u32;
    while (bits as usize) < MAG_LEVELS && coder.decode(reader, &mut x[bits as usize]) == 1 {
        bits += 1;
    }
    if bits as usize >= MAG_LEVELS {
        return Err(DecodeErrors::MalformedStreamStatic(
            "arithmetic magnitude category out of range"
        ));
    }

    let mut sz = 1_u32;
    let magnitude = &mut m[(bits as usize).min(MAG_LEVELS - 1)];
    for _ in 0..bits - 1 {
        sz = (sz << 1) | u32::from(coder.decode(reader, magnitude));
    }
    Ok(sz)
}

/// Encode one DC difference.
pub fn encode_dc_diff(
    coder: &mut ArithEncoder, contexts: &mut DcContexts, diff: i32, prev_diff: i32
) {
    let class = contexts.classify(prev_diff);

    if diff == 0 {
        coder.encode(&mut contexts.s0[class], 0);
        return;
    }
    coder.encode(&mut contexts.s0[class], 1);

    let negative = u8::from(diff < 0);
    coder.encode(&mut contexts.ss[class], negative);

    let sz = diff.unsigned_abs() - 1;
    let first = if negative == 1 {
        &mut contexts.sn[class]
    } else {
        &mut contexts.sp[class]
    };
    encode_magnitude(coder, first, &mut contexts.x, &mut contexts.m, sz);
}

/// Decode one DC difference.
pub fn decode_dc_diff<T: XtReaderTrait>(
    coder: &mut ArithDecoder, reader: &mut XtReader<T>, contexts: &mut DcContexts, prev_diff: i32
) -> Result<i32, DecodeErrors> {
    let class = contexts.classify(prev_diff);

    if coder.decode(reader, &mut contexts.s0[class]) == 0 {
        return Ok(0);
    }

    let negative = coder.decode(reader, &mut contexts.ss[class]);
    let first = if negative == 1 {
        &mut contexts.sn[class]
    } else {
        &mut contexts.sp[class]
    };
    let sz = decode_magnitude(coder, reader, first, &mut contexts.x, &mut contexts.m)?;

    let value = (sz + 1) as i32;
    Ok(if negative == 1 { -value } else { value })
}

/// Encode the AC coefficients of one block over the band `[ss, se]`,
/// `block` in natural order, values already shifted by the scan's `Al`.
pub fn encode_ac_band(
    coder: &mut ArithEncoder, contexts: &mut AcContexts, block: &[i32; 64], ss: usize, se: usize
) {
    use crate::misc::UN_ZIGZAG;

    // last position holding a nonzero coefficient
    let mut last = None;
    for k in (ss..=se).rev() {
        if block[UN_ZIGZAG[k]] != 0 {
            last = Some(k);
            break;
        }
    }

    let mut k = ss;
    loop {
        let Some(eob_at) = last else {
            coder.encode(&mut contexts.se[k], 1);
            break;
        };
        if k > eob_at {
            coder.encode(&mut contexts.se[k], 1);
            break;
        }
        coder.encode(&mut contexts.se[k], 0);

        // zero run up to the next nonzero coefficient
        while block[UN_ZIGZAG[k]] == 0 {
            coder.encode(&mut contexts.s0[k], 0);
            k += 1;
        }
        coder.encode(&mut contexts.s0[k], 1);

        let value = block[UN_ZIGZAG[k]];
        coder.encode_fixed(u8::from(value < 0));

        let sz = value.unsigned_abs() - 1;
        let (x, m) = if k <= usize::from(contexts.kx) {
            (&mut contexts.xlo, &mut contexts.mlo)
        } else {
            (&mut contexts.xhi, &mut contexts.mhi)
        };
        encode_magnitude(coder, &mut contexts.x1[k], x, m, sz);

        if k == se {
            break;
        }
        k += 1;
    }
}

/// Decode the AC coefficients of one block over the band `[ss, se]`.
pub fn decode_ac_band<T: XtReaderTrait>(
    coder: &mut ArithDecoder, reader: &mut XtReader<T>, contexts: &mut AcContexts,
    block: &mut [i32; 64], ss: usize, se: usize, shift: u8
) -> Result<(), DecodeErrors> {
    use crate::misc::UN_ZIGZAG;

    let mut k = ss;
    loop {
        if coder.decode(reader, &mut contexts.se[k]) == 1 {
            break;
        }

        while coder.decode(reader, &mut contexts.s0[k]) == 0 {
            k += 1;
            if k > se {
                return Err(DecodeErrors::MalformedStreamStatic(
                    "arithmetic AC run beyond the spectral band"
                ));
            }
        }

        let negative = coder.decode_fixed(reader);
        let (x, m) = if k <= usize::from(contexts.kx) {
            (&mut contexts.xlo, &mut contexts.mlo)
        } else {
            (&mut contexts.xhi, &mut contexts.mhi)
        };
        let sz = decode_magnitude(coder, reader, &mut contexts.x1[k], x, m)?;

        let value = (sz + 1) as i32;
        block[UN_ZIGZAG[k]] = (if negative == 1 { -value } else { value }) << shift;

        if k == se {
            break;
        }
        k += 1;
    }
    Ok(())
}

/// Encode a refinement pass of the AC band: correction bits for already
/// significant coefficients, significance plus sign for new ones, and an
/// end-of-band decision once no new significances remain.
pub fn encode_ac_refine_band(
    coder: &mut ArithEncoder, contexts: &mut AcContexts, block: &[i32; 64], ss: usize, se: usize,
    al: u8
) {
    use crate::misc::UN_ZIGZAG;

    // last position that becomes significant in this pass
    let mut last_new = None;
    for k in (ss..=se).rev() {
        if block[UN_ZIGZAG[k]].abs() >> al == 1 {
            last_new = Some(k);
            break;
        }
    }

    for k in ss..=se {
        let magnitude = block[UN_ZIGZAG[k]].abs() >> al;

        if magnitude > 1 {
            // already significant, correction bit only
            coder.encode_fixed((magnitude & 1) as u8);
            continue;
        }

        // end-of-band once no new significances remain
        match last_new {
            Some(eob_at) if k <= eob_at => {
                coder.encode(&mut contexts.se[k], 0);
            }
            _ => {
                coder.encode(&mut contexts.se[k], 1);
                // remaining correction bits still ride behind the EOB
                for j in k..=se {
                    let tail = block[UN_ZIGZAG[j]].abs() >> al;
                    if tail > 1 {
                        coder.encode_fixed((tail & 1) as u8);
                    }
                }
                return;
            }
        }

        if magnitude == 1 {
            coder.encode(&mut contexts.s0[k], 1);
            coder.encode_fixed(u8::from(block[UN_ZIGZAG[k]] < 0));
        } else {
            coder.encode(&mut contexts.s0[k], 0);
        }
    }
}

/// Decode a refinement pass of the AC band, the mirror of
/// [`encode_ac_refine_band`].
pub fn decode_ac_refine_band<T: XtReaderTrait>(
    coder: &mut ArithDecoder, reader: &mut XtReader<T>, contexts: &mut AcContexts,
    block: &mut [i32; 64], ss: usize, se: usize, al: u8
) -> Result<(), DecodeErrors> {
    use crate::misc::UN_ZIGZAG;

    let bit = 1_i32 << al;
    let mut ended = false;

    for k in ss..=se {
        let coeff = &mut block[UN_ZIGZAG[k]];

        if *coeff != 0 {
            // correction bit
            if coder.decode_fixed(reader) == 1 && (coeff.abs() & bit) == 0 {
                if *coeff >= 0 {
                    *coeff += bit;
                } else {
                    *coeff -= bit;
                }
            }
            continue;
        }

        if ended {
            continue;
        }
        if coder.decode(reader, &mut contexts.se[k]) == 1 {
            ended = true;
            continue;
        }

        if coder.decode(reader, &mut contexts.s0[k]) == 1 {
            let negative = coder.decode_fixed(reader);
            *coeff = if negative == 1 { -bit } else { bit };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use jxt_core::bytestream::{XtCursor, XtReader};

    use super::*;

    /// Encode a bit pattern, write it the way a scan would (stuffed), and
    /// decode it back.
    fn round_trip(bits: &[u8], contexts: usize) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = vec![Context::default(); contexts];

        for (i, &bit) in bits.iter().enumerate() {
            encoder.encode(&mut enc_ctx[i % contexts], bit);
        }
        let raw = encoder.finish();

        // stuff like the scan writer does
        let mut stuffed = vec![];
        for &byte in &raw {
            stuffed.push(byte);
            if byte == 0xff {
                stuffed.push(0x00);
            }
        }
        // terminate with a marker
        stuffed.extend_from_slice(&[0xff, 0xd9]);

        let mut reader = XtReader::new(XtCursor::new(stuffed));
        let mut decoder = ArithDecoder::new();
        let mut dec_ctx = vec![Context::default(); contexts];

        for (i, &bit) in bits.iter().enumerate() {
            let got = decoder.decode(&mut reader, &mut dec_ctx[i % contexts]);
            assert_eq!(got, bit, "bit {i}");
        }
    }

    #[test]
    fn round_trips_skewed_sequences() {
        let mut bits = vec![0_u8; 400];
        for i in (0..400).step_by(17) {
            bits[i] = 1;
        }
        round_trip(&bits, 1);
    }

    #[test]
    fn round_trips_alternating_sequences() {
        let bits: Vec<u8> = (0..300).map(|i| (i % 2) as u8).collect();
        round_trip(&bits, 2);
    }

    #[test]
    fn round_trips_pseudo_random_sequences() {
        let mut state = 0x1234_5678_u32;
        let bits: Vec<u8> = (0..1000)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 30) as u8 & 1
            })
            .collect();
        round_trip(&bits, 4);
    }

    #[test]
    fn dc_differences_round_trip() {
        let diffs = [0, 1, -1, 5, -32, 1000, -1000, 0, 0, 32767, -32768, 2];

        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = DcContexts::new(0, 1);
        let mut prev = 0;
        for &diff in &diffs {
            encode_dc_diff(&mut encoder, &mut enc_ctx, diff, prev);
            prev = diff;
        }

        let mut data = encoder.finish();
        data.extend_from_slice(&[0xff, 0xd9]);

        let mut reader = XtReader::new(XtCursor::new(data));
        let mut decoder = ArithDecoder::new();
        let mut dec_ctx = DcContexts::new(0, 1);
        let mut prev = 0;
        for &expected in &diffs {
            let got = decode_dc_diff(&mut decoder, &mut reader, &mut dec_ctx, prev).unwrap();
            assert_eq!(got, expected);
            prev = expected;
        }
    }

    #[test]
    fn ac_bands_round_trip() {
        use crate::misc::UN_ZIGZAG;

        let mut block = [0_i32; 64];
        block[UN_ZIGZAG[1]] = 3;
        block[UN_ZIGZAG[7]] = -1;
        block[UN_ZIGZAG[20]] = 255;
        block[UN_ZIGZAG[63]] = -2;

        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = AcContexts::new(5);
        encode_ac_band(&mut encoder, &mut enc_ctx, &block, 1, 63);

        let mut data = encoder.finish();
        data.extend_from_slice(&[0xff, 0xd9]);

        let mut reader = XtReader::new(XtCursor::new(data));
        let mut decoder = ArithDecoder::new();
        let mut dec_ctx = AcContexts::new(5);
        let mut decoded = [0_i32; 64];
        decode_ac_band(&mut decoder, &mut reader, &mut dec_ctx, &mut decoded, 1, 63, 0).unwrap();

        assert_eq!(block, decoded);
    }
}
