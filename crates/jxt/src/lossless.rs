//! Predictive (lossless and near-lossless) scans.
//!
//! Samples are predicted from their reconstructed neighbours with one of
//! the seven spatial predictors, the prediction error is entropy coded
//! with the DC magnitude-category machinery, and with a nonzero error
//! bound the error is first quantized to `2N+1` wide bins so every
//! reconstructed sample stays within `N` of its source.

use jxt_core::bytestream::{XtReaderTrait, XtWriterTrait};
use jxt_core::log::trace;

use crate::arith::{self, ArithDecoder, ArithEncoder, DcContexts};
use crate::bitstream::{BitStream, BitWriter};
use crate::decoder::JxtDecoder;
use crate::errors::{DecodeErrors, EncodeErrors};
use crate::huffman::HuffmanEncTable;
use crate::marker::Marker;
use crate::misc::{reduce_dc_diff, MAX_COMPONENTS};
use crate::scan_encode::{encode_dc_diff, FreqCounter, HuffWriter, SymbolSink};

/// Spatial prediction, Annex H. `x`/`y` walk the component plane, the
/// reconstructed neighbours come out of the plane being filled.
#[inline]
fn predict(
    samples: &[u16], stride: usize, x: usize, y: usize, predictor: u8, default: i32
) -> i32 {
    if x == 0 && y == 0 {
        return default;
    }
    if y == 0 {
        // first line continues from the left
        return i32::from(samples[x - 1]);
    }
    if x == 0 {
        // each line starts from the sample above
        return i32::from(samples[(y - 1) * stride]);
    }

    let ra = i32::from(samples[y * stride + x - 1]);
    let rb = i32::from(samples[(y - 1) * stride + x]);
    let rc = i32::from(samples[(y - 1) * stride + x - 1]);

    match predictor {
        1 => ra,
        2 => rb,
        3 => rc,
        4 => ra + rb - rc,
        5 => ra + ((rb - rc) >> 1),
        6 => rb + ((ra - rc) >> 1),
        7 => (ra + rb) >> 1,
        // predictor 0 carries no prediction; only differential frames may
        // use it and those are out of profile
        _ => 0
    }
}

/// The entropy state of one predictive scan.
enum LosslessEntropy {
    Huffman(BitStream),
    Arithmetic {
        coder:     ArithDecoder,
        contexts:  [Option<DcContexts>; MAX_COMPONENTS],
        prev_diff: [i32; MAX_COMPONENTS]
    }
}

/// Decode the current predictive scan into the sample planes.
pub(crate) fn decode_scan<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let predictor = decoder.spec_start;
    let point_transform = decoder.succ_low;
    let precision = decoder.info.precision;
    let near = i32::from(decoder.xt.params.as_ref().map_or(0, |p| p.near));

    if point_transform >= precision {
        return Err(DecodeErrors::SosError(format!(
            "point transform {point_transform} under precision {precision}"
        )));
    }

    let default = 1_i32 << (precision - 1 - point_transform);
    let max_value = (1_i32 << (precision - point_transform)) - 1;
    let step = 2 * near + 1;

    trace!("predictive scan: predictor {predictor}, Pt {point_transform}, NEAR {near}");

    let mut entropy = if decoder.info.sof.is_arithmetic() {
        let mut contexts: [Option<DcContexts>; MAX_COMPONENTS] = [None, None, None, None];
        for &index in &decoder.z_order[..decoder.scan_components] {
            let component = &decoder.components[index];
            let (l, u) = decoder.dc_conditioning[component.dc_table_slot];
            contexts[index] = Some(DcContexts::new(l, u));
        }
        LosslessEntropy::Arithmetic {
            coder: ArithDecoder::new(),
            contexts,
            prev_diff: [0; MAX_COMPONENTS]
        }
    } else {
        for &index in &decoder.z_order[..decoder.scan_components] {
            let component = &decoder.components[index];
            if decoder.dc_tables[component.dc_table_slot].is_none() {
                return Err(DecodeErrors::InvalidHuffman(format!(
                    "no table in slot {} for a predictive scan",
                    component.dc_table_slot
                )));
            }
        }
        LosslessEntropy::Huffman(BitStream::new())
    };

    let width = decoder.info.width;
    let height = decoder.info.height;
    let mut components = core::mem::take(&mut decoder.components);

    let mut todo = if decoder.restart_interval == 0 {
        usize::MAX
    } else {
        decoder.restart_interval
    };
    let mut restart_count = 0_usize;
    // a restart drops all neighbourhood state; the next sample of every
    // component is predicted from the default again
    let mut restarted_at: Option<(usize, usize)> = None;

    'rows: for y in 0..height {
        for x in 0..width {
            for &index in &decoder.z_order[..decoder.scan_components] {
                let component = &mut components[index];

                let diff = match &mut entropy {
                    LosslessEntropy::Huffman(stream) => {
                        let table = decoder.dc_tables[component.dc_table_slot]
                            .as_ref()
                            .ok_or(DecodeErrors::MalformedStreamStatic("table vanished"))?;
                        let mut scratch = 0_i32;
                        stream.decode_dc(&mut decoder.stream, table, &mut scratch)?
                    }
                    LosslessEntropy::Arithmetic {
                        coder,
                        contexts,
                        prev_diff
                    } => {
                        let ctx = contexts[index].as_mut().ok_or(
                            DecodeErrors::MalformedStreamStatic("missing conditioning")
                        )?;
                        let diff =
                            arith::decode_dc_diff(coder, &mut decoder.stream, ctx, prev_diff[index])?;
                        prev_diff[index] = diff;
                        diff
                    }
                };

                let stride = component.width_stride;
                let prediction = if restarted_at == Some((x, y)) {
                    default
                } else {
                    predict(&component.samples, stride, x, y, predictor, default)
                };

                let value = if near == 0 {
                    (prediction + diff).rem_euclid(1 << 16)
                } else {
                    (prediction + diff * step).clamp(0, max_value)
                };
                component.samples[y * stride + x] = value as u16;
            }

            todo = todo.saturating_sub(1);
            if todo == 0 && decoder.restart_interval > 0 {
                let marker = match &mut entropy {
                    LosslessEntropy::Huffman(stream) => {
                        stream.sync_to_marker(&mut decoder.stream);
                        stream.marker.take()
                    }
                    LosslessEntropy::Arithmetic { coder, .. } => {
                        coder.sync_to_marker(&mut decoder.stream);
                        coder.marker.take()
                    }
                };
                match marker {
                    Some(Marker::RST(_)) => {
                        restart_count += 1;
                        todo = decoder.restart_interval;
                        match &mut entropy {
                            LosslessEntropy::Huffman(stream) => stream.reset(),
                            LosslessEntropy::Arithmetic {
                                coder, prev_diff, ..
                            } => {
                                coder.reset();
                                *prev_diff = [0; MAX_COMPONENTS];
                            }
                        }
                        let next = if x + 1 < width { (x + 1, y) } else { (0, y + 1) };
                        restarted_at = Some(next);
                    }
                    Some(other) => {
                        decoder.pending_marker = Some(other);
                        break 'rows;
                    }
                    None => {
                        decoder.components = components;
                        return Err(DecodeErrors::UnexpectedEof);
                    }
                }
            }
        }
    }

    if restart_count > 0 {
        trace!("predictive scan crossed {restart_count} restart markers");
    }
    decoder.components = components;

    if decoder.pending_marker.is_none() {
        decoder.pending_marker = match &mut entropy {
            LosslessEntropy::Huffman(stream) => {
                stream.sync_to_marker(&mut decoder.stream);
                stream.marker.take()
            }
            LosslessEntropy::Arithmetic { coder, .. } => {
                coder.sync_to_marker(&mut decoder.stream);
                coder.marker.take()
            }
        };
    }

    // undo the point transform
    if point_transform > 0 {
        for component in &mut decoder.components {
            for sample in &mut component.samples {
                *sample <<= point_transform;
            }
        }
    }

    Ok(())
}

/// Quantize one prediction error against the error bound.
#[inline]
pub(crate) fn quantize_near(diff: i32, near: i32) -> i32 {
    if near == 0 {
        return diff;
    }
    let step = 2 * near + 1;
    if diff >= 0 {
        (diff + near) / step
    } else {
        -((near - diff) / step)
    }
}

/// Encode one predictive scan of planes already at coding precision.
///
/// `planes` are mutated to their reconstructed values so prediction stays
/// in lockstep with the decoder when `near > 0`.
#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
pub(crate) fn encode_scan<T: XtWriterTrait>(
    writer: &mut jxt_core::bytestream::XtWriter<T>, planes: &mut [Vec<u16>], width: usize,
    height: usize, precision: u8, point_transform: u8, predictor: u8, near: i32, arithmetic: bool,
    dc_table: Option<&HuffmanEncTable>
) -> Result<(), EncodeErrors> {
    let default = 1_i32 << (precision - 1 - point_transform);
    let max_value = (1_i32 << (precision - point_transform)) - 1;
    let step = 2 * near + 1;

    if arithmetic {
        let mut coder = ArithEncoder::new();
        let mut contexts: Vec<DcContexts> =
            planes.iter().map(|_| DcContexts::new(0, 1)).collect();
        let mut prev_diff = vec![0_i32; planes.len()];

        for y in 0..height {
            for x in 0..width {
                for (index, plane) in planes.iter_mut().enumerate() {
                    let diff = predict_and_diff(
                        plane, width, x, y, predictor, default, near, step, max_value
                    );
                    arith::encode_dc_diff(&mut coder, &mut contexts[index], diff, prev_diff[index]);
                    prev_diff[index] = diff;
                }
            }
        }

        for byte in coder.finish() {
            writer.write_u8(byte)?;
            if byte == 0xff {
                writer.write_u8(0x00)?;
            }
        }
        return Ok(());
    }

    let dc_table = dc_table.ok_or(EncodeErrors::PhaseError("missing lossless table"))?;
    let mut bits = BitWriter::new(writer);

    for y in 0..height {
        for x in 0..width {
            for plane in planes.iter_mut() {
                let diff =
                    predict_and_diff(plane, width, x, y, predictor, default, near, step, max_value);
                let mut sink = HuffWriter {
                    dc:  dc_table,
                    ac:  dc_table,
                    out: &mut bits
                };
                encode_dc_diff(&mut sink, diff)?;
            }
        }
    }
    bits.flush_with_ones()?;
    Ok(())
}

/// Count the difference categories of one predictive scan for the table
/// optimizer. Mutates `planes` exactly like the real pass.
pub(crate) fn count_scan(
    planes: &mut [Vec<u16>], width: usize, height: usize, precision: u8, point_transform: u8,
    predictor: u8, near: i32, freq: &mut [u32; 256]
) -> Result<(), EncodeErrors> {
    let default = 1_i32 << (precision - 1 - point_transform);
    let max_value = (1_i32 << (precision - point_transform)) - 1;
    let step = 2 * near + 1;
    let mut unused = [0_u32; 256];

    for y in 0..height {
        for x in 0..width {
            for plane in planes.iter_mut() {
                let diff =
                    predict_and_diff(plane, width, x, y, predictor, default, near, step, max_value);
                let mut sink = FreqCounter {
                    dc: freq,
                    ac: &mut unused
                };
                encode_dc_diff(&mut sink, diff)?;
            }
        }
    }
    Ok(())
}

/// Compute the coded difference for one sample and store its
/// reconstruction back into the plane.
#[allow(clippy::too_many_arguments)]
fn predict_and_diff(
    plane: &mut [u16], stride: usize, x: usize, y: usize, predictor: u8, default: i32, near: i32,
    step: i32, max_value: i32
) -> i32 {
    let prediction = predict(plane, stride, x, y, predictor, default);
    let actual = i32::from(plane[y * stride + x]);

    if near == 0 {
        reduce_dc_diff(actual - prediction)
    } else {
        let quantized = quantize_near(actual - prediction, near);
        let reconstructed = (prediction + quantized * step).clamp(0, max_value);
        plane[y * stride + x] = reconstructed as u16;
        quantized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_quantization_bounds_the_error() {
        for near in 1..=4_i32 {
            let step = 2 * near + 1;
            for diff in -300..=300 {
                let q = quantize_near(diff, near);
                assert!((diff - q * step).abs() <= near, "diff {diff} near {near}");
            }
        }
    }

    #[test]
    fn predictors_reconstruct_their_inputs() {
        // encode-side diff plus decode-side reconstruction must cancel for
        // every predictor at NEAR zero
        let source: Vec<u16> = (0..64_u16).map(|v| (v * 37) % 256).collect();

        for predictor in 1..=7_u8 {
            let mut plane = source.clone();
            let mut diffs = vec![];
            for y in 0..8 {
                for x in 0..8 {
                    diffs.push(predict_and_diff(
                        &mut plane, 8, x, y, predictor, 128, 0, 1, 255
                    ));
                }
            }

            let mut recon = vec![0_u16; 64];
            let mut i = 0;
            for y in 0..8 {
                for x in 0..8 {
                    let p = predict(&recon, 8, x, y, predictor, 128);
                    recon[y * 8 + x] = (p + diffs[i]).rem_euclid(65536) as u16;
                    i += 1;
                }
            }
            assert_eq!(recon, source, "predictor {predictor}");
        }
    }
}
