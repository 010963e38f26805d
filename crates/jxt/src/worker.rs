//! Frame finishing: hidden refinement, the IDCT sweep, upsampling, color
//! conversion and the merge of the extension layers.

use jxt_core::bytestream::{XtCursor, XtReader, XtReaderTrait};
use jxt_core::colorspace::ColorSpace;
use jxt_core::log::trace;
use jxt_core::options::ColorTransformKind;
use jxt_core::sample::f16_bits_to_f32;

use crate::bitstream::BitStream;
use crate::color_convert::ColorTransform;
use crate::decoder::{try_alloc_u16, JxtDecoder, Pixels};
use crate::dct::kernel_for;
use crate::errors::DecodeErrors;
use crate::huffman::{HuffmanTable, REFINEMENT_AC_BITS, REFINEMENT_AC_VALUES};
use crate::tonemap::ToneMap;
use crate::upsampler::upsample_plane;

/// The fixed AC table hidden refinement scans are coded with.
pub(crate) fn refinement_table() -> Result<HuffmanTable, DecodeErrors> {
    let mut values = [0_u8; 256];
    values[..REFINEMENT_AC_VALUES.len()].copy_from_slice(REFINEMENT_AC_VALUES);
    HuffmanTable::new(&REFINEMENT_AC_BITS, values, false, true)
}

/// Fold the hidden refinement bit planes back into the coefficient
/// planes.
pub(crate) fn apply_hidden_refinement<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let hidden_bits = decoder.xt.params.as_ref().map_or(0, |p| p.hidden_bits);
    if hidden_bits == 0 {
        return Ok(());
    }
    let Some(data) = decoder.xt.refinement_stream() else {
        return Err(DecodeErrors::MalformedStreamStatic(
            "hidden bits declared but no refinement data present"
        ));
    };

    trace!("applying {hidden_bits} hidden coefficient bit planes");

    // sequential scans store the coefficients unshifted, so lift them to
    // make room for the hidden planes; progressive scans already carry
    // their successive approximation shift
    if !decoder.info.sof.is_progressive() {
        for component in &mut decoder.components {
            for coeff in &mut component.coeffs {
                *coeff <<= hidden_bits;
            }
        }
    }

    let ac_table = refinement_table()?;
    let mut reader = XtReader::new(XtCursor::new(data));
    let mut stream = BitStream::new();

    let mut components = core::mem::take(&mut decoder.components);

    for al in (0..hidden_bits).rev() {
        // DC plane of every component
        stream.set_scan_params(0, 0, al + 1, al);
        for component in &mut components {
            let blocks_per_row = component.width_stride / 8;
            for by in 0..component.height.div_ceil(8) {
                for bx in 0..component.width.div_ceil(8) {
                    let offset = (by * blocks_per_row + bx) * 64;
                    let block: &mut [i32; 64] = (&mut component.coeffs[offset..offset + 64])
                        .try_into()
                        .map_err(|_| {
                            DecodeErrors::MalformedStreamStatic("refinement outside plane")
                        })?;
                    stream.decode_dc_refine(&mut reader, block)?;
                }
            }
        }

        // AC plane per component
        for component in &mut components {
            stream.set_scan_params(1, 63, al + 1, al);
            let blocks_per_row = component.width_stride / 8;
            for by in 0..component.height.div_ceil(8) {
                for bx in 0..component.width.div_ceil(8) {
                    let offset = (by * blocks_per_row + bx) * 64;
                    let block: &mut [i32; 64] = (&mut component.coeffs[offset..offset + 64])
                        .try_into()
                        .map_err(|_| {
                            DecodeErrors::MalformedStreamStatic("refinement outside plane")
                        })?;
                    stream.decode_ac_refine(&mut reader, &ac_table, block)?;
                }
            }
        }
    }

    decoder.components = components;
    Ok(())
}

/// Dequantize and inverse transform every block into sample planes.
pub(crate) fn dequantize_and_idct<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let params = decoder.xt.params.clone().unwrap_or_default();
    let precision = decoder.info.precision;
    let half = 1_i32 << (precision - 1);
    let max_sample = (1_i32 << precision) - 1;

    for component in &mut decoder.components {
        let table = decoder.qt_tables[usize::from(component.quant_table_slot)]
            .ok_or(DecodeErrors::DqtError(
                "no quantization table for a coded component".to_string()
            ))?;

        let kernel = kernel_for(
            &table,
            params.reversible_dct,
            params.hidden_bits,
            false,
            false
        );

        let stride = component.width_stride;
        let blocks_per_row = stride / 8;
        component.samples = try_alloc_u16(stride * component.height_stride)?;

        let mut pixels = [0_i32; 64];
        for by in 0..component.height_stride / 8 {
            for bx in 0..blocks_per_row {
                let offset = (by * blocks_per_row + bx) * 64;
                let block: &[i32; 64] = (&component.coeffs[offset..offset + 64])
                    .try_into()
                    .map_err(|_| DecodeErrors::MalformedStreamStatic("bad coefficient plane"))?;

                kernel.inverse(block, &mut pixels, half);

                for row in 0..8 {
                    let dst_row = by * 8 + row;
                    let dst = &mut component.samples
                        [dst_row * stride + bx * 8..dst_row * stride + bx * 8 + 8];
                    for (d, &s) in dst.iter_mut().zip(&pixels[row * 8..row * 8 + 8]) {
                        *d = s.clamp(0, max_sample) as u16;
                    }
                }
            }
        }

        component.coeffs = vec![];
    }
    Ok(())
}

/// Nearest-index resample for the sampling ratios the triangle filter
/// does not cover.
fn resample_nearest(
    plane: &[u16], stride: usize, src_w: usize, src_h: usize, dst_w: usize, dst_h: usize
) -> Vec<u16> {
    let mut out = vec![0_u16; dst_w * dst_h];
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            out[y * dst_w + x] = plane[sy * stride + sx];
        }
    }
    out
}

/// Bring one component to full image resolution.
fn component_to_full_res<T: XtReaderTrait>(
    decoder: &JxtDecoder<T>, index: usize
) -> Vec<u16> {
    let component = &decoder.components[index];
    let width = decoder.info.width;
    let height = decoder.info.height;

    let fx = decoder.h_max / component.horizontal_sample;
    let fy = decoder.v_max / component.vertical_sample;

    if decoder.h_max % component.horizontal_sample != 0
        || decoder.v_max % component.vertical_sample != 0
    {
        return resample_nearest(
            &component.samples,
            component.width_stride,
            component.width,
            component.height,
            width,
            height
        );
    }

    if fx == 1 && fy == 1 {
        // crop the block padding
        let mut out = vec![0_u16; width * height];
        for y in 0..height {
            let src = &component.samples[y * component.width_stride..];
            out[y * width..(y + 1) * width].copy_from_slice(&src[..width]);
        }
        return out;
    }

    upsample_plane(
        &component.samples,
        component.width_stride,
        component.height,
        fx,
        fy,
        width,
        height
    )
}

/// Assemble the final pixels: upsample, inverse color transform, merge
/// the residual layer, and format for the caller.
#[allow(clippy::too_many_lines)]
pub(crate) fn finish_pixels<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<Pixels, DecodeErrors> {
    let width = decoder.info.width;
    let height = decoder.info.height;
    let num_components = decoder.components.len();
    let precision = decoder.info.precision;

    if height == 0 {
        return Err(DecodeErrors::MalformedStreamStatic(
            "frame ended with no height established"
        ));
    }

    let params = decoder.xt.params.clone().unwrap_or_default();

    // full resolution planes
    let mut planes: Vec<Vec<u16>> = (0..num_components)
        .map(|i| component_to_full_res(decoder, i))
        .collect();

    // undo the coding color transform
    let transform_kind = if decoder.xt.params.is_some() {
        params.base_transform_kind()
    } else if num_components == 3 {
        match decoder.xt.adobe_transform {
            Some(ColorSpace::RGB) => ColorTransformKind::None,
            _ => ColorTransformKind::YCbCr
        }
    } else {
        ColorTransformKind::None
    };

    if num_components >= 3 {
        let transform = ColorTransform::new(transform_kind, precision);
        if !transform.is_pass_through() {
            for y in 0..height {
                let range = y * width..(y + 1) * width;
                let (first, rest) = planes.split_at_mut(1);
                let (second, third) = rest.split_at_mut(1);
                let mut rows: [&mut [u16]; 3] = [
                    &mut first[0][range.clone()],
                    &mut second[0][range.clone()],
                    &mut third[0][range]
                ];
                transform.inverse_rows(&mut rows);
            }
        }
    }

    // native interleave
    let mut base = vec![0_u16; width * height * num_components];
    for (c, plane) in planes.iter().enumerate() {
        for (i, &v) in plane.iter().enumerate() {
            base[i * num_components + c] = v;
        }
    }
    drop(planes);

    // tone map lift into the HDR domain
    let tone_map = params.tone_map.as_ref().map(|lut| ToneMap {
        forward:  lut.clone(),
        inverse:  vec![],
        hdr_bits: 16
    });
    if let Some(map) = &tone_map {
        for v in &mut base {
            *v = map.lift(*v);
        }
    }

    // residual layer
    if params.residual {
        let data = decoder
            .xt
            .residual_stream()
            .ok_or(DecodeErrors::MalformedStreamStatic(
                "residual declared but no chunks present"
            ))?;

        let residual_options = decoder
            .options
            .set_out_colorspace(if num_components == 1 {
                ColorSpace::Luma
            } else {
                ColorSpace::RGB
            });
        let mut residual_decoder =
            JxtDecoder::new_with_options(XtCursor::new(data), residual_options);
        let residual = residual_decoder.decode()?;

        let residual = match residual {
            Pixels::U16(v) => v,
            Pixels::U8(v) => v.into_iter().map(u16::from).collect(),
            Pixels::F32(_) => {
                return Err(DecodeErrors::MalformedStreamStatic(
                    "residual layer cannot itself be floating point"
                ))
            }
        };
        if residual.len() != base.len() {
            return Err(DecodeErrors::MalformedStreamStatic(
                "residual dimensions disagree with the base image"
            ));
        }

        // the residual domain: 16 bit when tone mapped, else the base
        // precision
        let (modulo, half): (i64, i64) = if tone_map.is_some() {
            (1 << 16, 1 << 15)
        } else {
            (1_i64 << precision, 1_i64 << (precision - 1))
        };

        for (b, r) in base.iter_mut().zip(residual.iter()) {
            let sum = i64::from(*b) + i64::from(*r) - half;
            *b = if params.modular {
                sum.rem_euclid(modulo) as u16
            } else {
                sum.clamp(0, modulo - 1) as u16
            };
        }
    }

    // adapt to the requested colorspace and sample format
    let out_colorspace = decoder.options.out_colorspace();
    let out_channels = match (num_components, out_colorspace) {
        (1, ColorSpace::Luma) | (3, ColorSpace::RGB) => num_components,
        (1, ColorSpace::RGB) => 3,
        (1 | 3, ColorSpace::RGBX) => 4,
        (d, ColorSpace::Unknown) => d,
        (d, requested) => {
            return Err(DecodeErrors::InvalidParameter(format!(
                "cannot produce {requested:?} from a {d} component image"
            )))
        }
    };

    let pixel_count = width * height;
    let float_out = params.float_out && tone_map.is_some();
    let max_out = if tone_map.is_some() {
        u16::MAX
    } else {
        ((1_u32 << precision) - 1) as u16
    };

    let channel_value = |i: usize, c: usize| -> u16 {
        if c < num_components {
            base[i * num_components + c]
        } else if c == 3 {
            // the filler channel of RGBX
            max_out
        } else {
            // grayscale replication
            base[i * num_components]
        }
    };

    if float_out {
        let mut out = Vec::with_capacity(pixel_count * out_channels);
        for i in 0..pixel_count {
            for c in 0..out_channels {
                out.push(f16_bits_to_f32(channel_value(i, c)));
            }
        }
        return Ok(Pixels::F32(out));
    }

    if precision > 8 || tone_map.is_some() {
        let mut out = Vec::with_capacity(pixel_count * out_channels);
        for i in 0..pixel_count {
            for c in 0..out_channels {
                out.push(channel_value(i, c));
            }
        }
        return Ok(Pixels::U16(out));
    }

    let mut out = Vec::with_capacity(pixel_count * out_channels);
    for i in 0..pixel_count {
        for c in 0..out_channels {
            out.push(channel_value(i, c) as u8);
        }
    }
    Ok(Pixels::U8(out))
}
