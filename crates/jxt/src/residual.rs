//! JPEG XT side data: the APP11 box layer.
//!
//! The extension layers ride inside APP11 segments so a legacy decoder
//! sees a plain JPEG. Three box types exist: the parameter box describing
//! which layers are present, residual codestream chunks, and hidden
//! refinement chunks. Chunks carry a sequence number and are reassembled
//! in order, the way ICC profiles are carried in chunked APP2 segments.

use jxt_core::bytestream::{XtReaderTrait, XtWriter, XtWriterTrait};
use jxt_core::colorspace::ColorSpace;
use jxt_core::log::{trace, warn};
use jxt_core::options::ColorTransformKind;

use crate::decoder::JxtDecoder;
use crate::errors::{DecodeErrors, EncodeErrors};

/// Identifies our APP11 payloads.
const BOX_MAGIC: &[u8; 4] = b"JXT\0";

/// Box types.
const BOX_PARAMS: u8 = 1;
const BOX_RESIDUAL: u8 = 2;
const BOX_REFINEMENT: u8 = 3;

/// Largest payload per APP11 segment: 65535 minus the length field, the
/// magic, the box type and the sequence number.
const MAX_CHUNK: usize = 65533 - BOX_MAGIC.len() - 3;

/// Flags of the parameter box.
const FLAG_RESIDUAL: u8 = 1 << 0;
const FLAG_MODULAR: u8 = 1 << 1;
const FLAG_REVERSIBLE: u8 = 1 << 2;
const FLAG_TONE_MAP: u8 = 1 << 3;
const FLAG_FLOAT_OUT: u8 = 1 << 4;

/// Decoded parameter box.
#[derive(Clone, Default)]
pub(crate) struct XtParams {
    pub residual:        bool,
    pub modular:         bool,
    pub reversible_dct:  bool,
    pub float_out:       bool,
    pub hidden_bits:     u8,
    pub near:            u16,
    /// Base layer color transform: 0 none, 1 YCbCr, 2 RCT.
    pub color_transform: u8,
    /// LDR to HDR lookup table when tone mapping is in use.
    pub tone_map:        Option<Vec<u16>>
}

impl XtParams {
    pub fn base_transform_kind(&self) -> ColorTransformKind {
        match self.color_transform {
            1 => ColorTransformKind::YCbCr,
            2 => ColorTransformKind::Rct,
            _ => ColorTransformKind::None
        }
    }
}

/// All extension data picked up while parsing the base codestream.
#[derive(Default)]
pub(crate) struct XtSideData {
    pub params:            Option<XtParams>,
    residual_chunks:       Vec<(u16, Vec<u8>)>,
    refinement_chunks:     Vec<(u16, Vec<u8>)>,
    pub adobe_transform:   Option<ColorSpace>
}

impl XtSideData {
    /// The reassembled residual codestream, if any was carried.
    pub fn residual_stream(&mut self) -> Option<Vec<u8>> {
        assemble(&mut self.residual_chunks)
    }

    /// The reassembled hidden refinement bits, if any were carried.
    pub fn refinement_stream(&mut self) -> Option<Vec<u8>> {
        assemble(&mut self.refinement_chunks)
    }
}

fn assemble(chunks: &mut Vec<(u16, Vec<u8>)>) -> Option<Vec<u8>> {
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(seq, _)| *seq);
    let mut out = Vec::with_capacity(chunks.iter().map(|(_, c)| c.len()).sum());
    for (_, chunk) in chunks.drain(..) {
        out.extend_from_slice(&chunk);
    }
    Some(out)
}

/// Parse one APP11 segment; silently skips foreign APP11 payloads.
pub(crate) fn parse_app11<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let length = usize::from(decoder.stream.get_u16_be_err()?);
    if length < 2 {
        return Err(DecodeErrors::MalformedStreamStatic("APP11 too short"));
    }
    let mut remaining = length - 2;

    if remaining < BOX_MAGIC.len() + 1
        || decoder.stream.peek_at(0, BOX_MAGIC.len())? != *BOX_MAGIC
    {
        warn!("foreign APP11 segment, skipping");
        decoder.stream.skip(remaining)?;
        return Ok(());
    }
    decoder.stream.skip(BOX_MAGIC.len())?;
    remaining -= BOX_MAGIC.len();

    let box_type = decoder.stream.read_u8_err()?;
    remaining -= 1;

    match box_type {
        BOX_PARAMS => {
            let params = parse_params(decoder, remaining)?;
            decoder.xt.params = Some(params);
        }
        BOX_RESIDUAL | BOX_REFINEMENT => {
            if remaining < 2 {
                return Err(DecodeErrors::MalformedStreamStatic(
                    "chunk box without a sequence number"
                ));
            }
            let seq = decoder.stream.get_u16_be_err()?;
            remaining -= 2;

            let mut chunk = vec![0_u8; remaining];
            decoder.stream.read_exact_bytes(&mut chunk)?;

            if box_type == BOX_RESIDUAL {
                decoder.xt.residual_chunks.push((seq, chunk));
            } else {
                decoder.xt.refinement_chunks.push((seq, chunk));
            }
        }
        other => {
            warn!("unknown extension box type {other}, skipping");
            decoder.stream.skip(remaining)?;
        }
    }
    Ok(())
}

fn parse_params<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, payload: usize
) -> Result<XtParams, DecodeErrors> {
    if payload < 7 {
        return Err(DecodeErrors::MalformedStreamStatic("parameter box too short"));
    }

    let version = decoder.stream.read_u8_err()?;
    if version != 1 {
        return Err(DecodeErrors::NotInProfile("unknown extension box version"));
    }
    let flags = decoder.stream.read_u8_err()?;
    let hidden_bits = decoder.stream.read_u8_err()?;
    let color_transform = decoder.stream.read_u8_err()?;
    let _precision = decoder.stream.read_u8_err()?;
    let near = decoder.stream.get_u16_be_err()?;
    let mut consumed = 7;

    if hidden_bits > 4 {
        return Err(DecodeErrors::MalformedStreamStatic(
            "hidden coefficient bits beyond 4"
        ));
    }

    let tone_map = if flags & FLAG_TONE_MAP != 0 {
        if payload < consumed + 512 {
            return Err(DecodeErrors::MalformedStreamStatic(
                "parameter box too short for a tone map"
            ));
        }
        let mut lut = vec![0_u16; 256];
        for entry in &mut lut {
            *entry = decoder.stream.get_u16_be_err()?;
        }
        consumed += 512;
        Some(lut)
    } else {
        None
    };

    if consumed != payload {
        return Err(DecodeErrors::MalformedStreamStatic(
            "parameter box length mismatch"
        ));
    }

    trace!(
        "extension parameters: residual={} modular={} hidden={} near={}",
        flags & FLAG_RESIDUAL != 0,
        flags & FLAG_MODULAR != 0,
        hidden_bits,
        near
    );

    Ok(XtParams {
        residual: flags & FLAG_RESIDUAL != 0,
        modular: flags & FLAG_MODULAR != 0,
        reversible_dct: flags & FLAG_REVERSIBLE != 0,
        float_out: flags & FLAG_FLOAT_OUT != 0,
        hidden_bits,
        near,
        color_transform,
        tone_map
    })
}

/// Serialize the parameter box into an APP11 segment.
pub(crate) fn write_params<T: XtWriterTrait>(
    writer: &mut XtWriter<T>, params: &XtParams
) -> Result<(), EncodeErrors> {
    let mut flags = 0_u8;
    if params.residual {
        flags |= FLAG_RESIDUAL;
    }
    if params.modular {
        flags |= FLAG_MODULAR;
    }
    if params.reversible_dct {
        flags |= FLAG_REVERSIBLE;
    }
    if params.tone_map.is_some() {
        flags |= FLAG_TONE_MAP;
    }
    if params.float_out {
        flags |= FLAG_FLOAT_OUT;
    }

    let payload_len = 7 + params.tone_map.as_ref().map_or(0, |_| 512);
    let segment_len = 2 + BOX_MAGIC.len() + 1 + payload_len;

    writer.write_u16_be(0xffeb)?;
    writer.write_u16_be(segment_len as u16)?;
    writer.write_all(BOX_MAGIC)?;
    writer.write_u8(BOX_PARAMS)?;
    writer.write_u8(1)?;
    writer.write_u8(flags)?;
    writer.write_u8(params.hidden_bits)?;
    writer.write_u8(params.color_transform)?;
    writer.write_u8(0)?;
    writer.write_u16_be(params.near)?;
    if let Some(lut) = &params.tone_map {
        for &entry in lut {
            writer.write_u16_be(entry)?;
        }
    }
    Ok(())
}

/// Chunk a payload across as many APP11 segments as needed.
pub(crate) fn write_chunks<T: XtWriterTrait>(
    writer: &mut XtWriter<T>, box_type: u8, data: &[u8]
) -> Result<(), EncodeErrors> {
    for (seq, chunk) in data.chunks(MAX_CHUNK).enumerate() {
        if seq > usize::from(u16::MAX) {
            return Err(EncodeErrors::Overflow("too many extension chunks"));
        }
        let segment_len = 2 + BOX_MAGIC.len() + 3 + chunk.len();

        writer.write_u16_be(0xffeb)?;
        writer.write_u16_be(segment_len as u16)?;
        writer.write_all(BOX_MAGIC)?;
        writer.write_u8(box_type)?;
        writer.write_u16_be(seq as u16)?;
        writer.write_all(chunk)?;
    }
    Ok(())
}

/// Box type of residual chunks, exposed for the encoder.
pub(crate) const RESIDUAL_BOX: u8 = BOX_RESIDUAL;
/// Box type of hidden refinement chunks, exposed for the encoder.
pub(crate) const REFINEMENT_BOX: u8 = BOX_REFINEMENT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_segment_limits() {
        let data = vec![0xab_u8; MAX_CHUNK * 2 + 100];
        let mut sink = vec![];
        {
            let mut writer = XtWriter::new(&mut sink);
            write_chunks(&mut writer, RESIDUAL_BOX, &data).unwrap();
        }

        // three segments, each within the 16 bit length field
        let mut segments = 0;
        let mut offset = 0;
        while offset < sink.len() {
            assert_eq!(&sink[offset..offset + 2], &[0xff, 0xeb]);
            let len = usize::from(u16::from_be_bytes([sink[offset + 2], sink[offset + 3]]));
            assert!(len <= 65535);
            offset += 2 + len;
            segments += 1;
        }
        assert_eq!(segments, 3);
        assert_eq!(offset, sink.len());
    }
}
