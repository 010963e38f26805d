//! The encoder.
//!
//! Encoding follows the same skeleton as decoding with the direction
//! reversed: samples are color transformed and downsampled into component
//! planes, transformed and quantized into coefficient planes, and the
//! scans walk those planes emitting entropy coded data. The optional
//! measurement pass runs the identical walk with a counting sink before
//! the real emission, and the extension layers (hidden coefficient bits,
//! the residual codestream) are grafted on as APP11 boxes before EOI.

use jxt_core::bytestream::{XtWriter, XtWriterTrait};
use jxt_core::colorspace::ColorSpace;
use jxt_core::log::trace;
use jxt_core::options::{ColorTransformKind, EncoderOptions, FrameKind, ScanSpec};
use jxt_core::sample::f32_to_f16_bits;

use crate::arith::{self, AcContexts, ArithEncoder, DcContexts};
use crate::bitstream::BitWriter;
use crate::color_convert::ColorTransform;
use crate::dct::kernel_for;
use crate::errors::EncodeErrors;
use crate::huffman::{
    build_optimal_table, HuffmanEncTable, CHROMA_AC_BITS, CHROMA_AC_VALUES, CHROMA_DC_BITS,
    CHROMA_DC_VALUES, LUMA_AC_BITS, LUMA_AC_VALUES, LUMA_DC_BITS, LUMA_DC_VALUES,
    REFINEMENT_AC_BITS, REFINEMENT_AC_VALUES
};
use crate::misc::{SofMarker, ZIGZAG};
use crate::quant::{estimate_critical_slope, rd_optimize_block, scale_quality, DEFAULT_CHROMA_QT, DEFAULT_LUMA_QT};
use crate::residual::{self, XtParams};
use crate::scan_encode::{self, AcScanState, FreqCounter, HuffWriter};
use crate::tonemap::ToneMap;
use crate::upsampler::downsample_plane;

/// Pixel data handed to the encoder.
enum SourcePixels<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    F32(&'a [f32])
}

/// A JPEG / JPEG XT encoder over borrowed pixel data.
///
/// Pixels are interleaved in the order of the configured colorspace.
pub struct JxtEncoder<'a> {
    source:  SourcePixels<'a>,
    options: EncoderOptions
}

/// One component plane being encoded.
struct CompPlane {
    h:             usize,
    v:             usize,
    width:         usize,
    height:        usize,
    width_stride:  usize,
    height_stride: usize,
    qt_slot:       usize,
    dc_slot:       usize,
    ac_slot:       usize,
    samples:       Vec<u16>,
    coeffs:        Vec<i32>,
    dc_pred:       i32
}

impl CompPlane {
    fn blocks_per_row(&self) -> usize {
        self.width_stride / 8
    }

    fn block(&self, bx: usize, by: usize) -> &[i32; 64] {
        let offset = (by * self.blocks_per_row() + bx) * 64;
        (&self.coeffs[offset..offset + 64]).try_into().unwrap()
    }
}

/// Everything derived from the options before any bytes are written.
struct EncodeState {
    width:      usize,
    height:     usize,
    precision:  u8,
    h_max:      usize,
    v_max:      usize,
    mcu_x:      usize,
    mcu_y:      usize,
    sof:        SofMarker,
    comps:      Vec<CompPlane>,
    /// Quantization tables by slot, natural order.
    qt:         Vec<[u16; 64]>,
    hidden:     u8,
    reversible: bool
}

impl<'a> JxtEncoder<'a> {
    /// Encoder over 8 bit samples.
    #[must_use]
    pub fn new(data: &'a [u8], options: EncoderOptions) -> JxtEncoder<'a> {
        JxtEncoder {
            source: SourcePixels::U8(data),
            options
        }
    }

    /// Encoder over 16 bit samples for precisions above 8.
    #[must_use]
    pub fn new_u16(data: &'a [u16], options: EncoderOptions) -> JxtEncoder<'a> {
        JxtEncoder {
            source: SourcePixels::U16(data),
            options
        }
    }

    /// Encoder over float HDR samples; requires a tone map so the base
    /// layer can be derived.
    #[must_use]
    pub fn new_f32(data: &'a [f32], options: EncoderOptions) -> JxtEncoder<'a> {
        JxtEncoder {
            source: SourcePixels::F32(data),
            options
        }
    }

    /// Encode into `sink`, returning the number of bytes written.
    pub fn encode<W: XtWriterTrait>(&self, sink: W) -> Result<usize, EncodeErrors> {
        let mut writer = XtWriter::new(sink);
        self.encode_into(&mut writer)?;
        writer.flush()?;
        Ok(writer.bytes_written())
    }

    /// Convenience: encode into a fresh byte vector.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeErrors> {
        let mut out = vec![];
        self.encode(&mut out)?;
        Ok(out)
    }

    #[allow(clippy::too_many_lines)]
    fn encode_into<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>
    ) -> Result<(), EncodeErrors> {
        self.validate()?;

        let opts = &self.options;
        let flags = opts.flags();
        let num_components = opts.colorspace().num_components();
        let is_hdr = matches!(self.source, SourcePixels::F32(_));

        // the HDR sample domain is half-float bits behind a tone map
        let tone_map = opts.tone_map().map(|spec| ToneMap::from_spec(spec, 16, is_hdr));

        // gather the source into planes at full resolution
        let mut planes = self.deinterleave(num_components)?;

        // the HDR layer keeps the originals, the base gets the squashed
        // 8 bit rendition
        let hdr_planes = if let Some(map) = &tone_map {
            let originals = planes.clone();
            for plane in &mut planes {
                for value in plane.iter_mut() {
                    *value = map.squash(*value);
                }
            }
            Some(originals)
        } else {
            None
        };

        let base_precision = if tone_map.is_some() { 8 } else { opts.precision() };

        // color transform into coding planes
        let transform_kind = self.base_transform_kind(num_components);
        if num_components >= 3 {
            let transform = ColorTransform::new(transform_kind.clone(), base_precision);
            if !transform.is_pass_through() {
                let width = opts.width();
                for y in 0..opts.height() {
                    let range = y * width..(y + 1) * width;
                    let (first, rest) = planes.split_at_mut(1);
                    let (second, third) = rest.split_at_mut(1);
                    let mut rows: [&mut [u16]; 3] = [
                        &mut first[0][range.clone()],
                        &mut second[0][range.clone()],
                        &mut third[0][range]
                    ];
                    transform.forward_rows(&mut rows);
                }
            }
        }

        let non_default_transform =
            num_components >= 3 && !matches!(transform_kind, ColorTransformKind::YCbCr);
        let needs_params = flags.residual_coding
            || flags.reversible_dct
            || opts.hidden_dct_bits() > 0
            || tone_map.is_some()
            || opts.error_bound() > 0
            || non_default_transform;

        writer.write_u16_be(0xffd8)?;

        let params = XtParams {
            residual: flags.residual_coding,
            modular: flags.residual_coding && opts.hdr_quality() >= 100,
            reversible_dct: flags.reversible_dct,
            float_out: is_hdr,
            hidden_bits: opts.hidden_dct_bits(),
            near: opts.error_bound(),
            color_transform: match transform_kind {
                ColorTransformKind::YCbCr => 1,
                ColorTransformKind::Rct => 2,
                _ => 0
            },
            tone_map: tone_map.as_ref().map(|m| m.forward.clone())
        };
        if needs_params {
            residual::write_params(writer, &params)?;
        }

        let lossless_kind = matches!(opts.frame_kind(), FrameKind::Lossless | FrameKind::JpegLs);

        let (refinement, recon) = if lossless_kind {
            self.encode_predictive(writer, &mut planes, base_precision)?;
            // predictive planes now hold their reconstruction in the
            // coding domain; undo the color transform for the residual
            if flags.residual_coding && num_components >= 3 {
                let transform = ColorTransform::new(transform_kind.clone(), base_precision);
                if !transform.is_pass_through() {
                    let width = opts.width();
                    for y in 0..opts.height() {
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
            (None, planes)
        } else {
            let mut state = self.prepare_dct(&planes, base_precision)?;
            let refinement = self.encode_dct(writer, &mut state)?;
            let recon = if flags.residual_coding {
                self.reconstruct(&state, base_precision, num_components)?
            } else {
                vec![]
            };
            (refinement, recon)
        };

        if let Some(data) = refinement {
            residual::write_chunks(writer, residual::REFINEMENT_BOX, &data)?;
        }

        if flags.residual_coding {
            let residual_planes = self.residual_planes(
                &recon,
                hdr_planes.as_deref(),
                tone_map.as_ref(),
                num_components
            )?;
            let stream = self.encode_residual_stream(residual_planes, tone_map.is_some())?;
            residual::write_chunks(writer, residual::RESIDUAL_BOX, &stream)?;
        }

        writer.write_u16_be(0xffd9)?;
        Ok(())
    }

    /// Range checks over the whole configuration surface.
    #[allow(clippy::too_many_lines)]
    fn validate(&self) -> Result<(), EncodeErrors> {
        let opts = &self.options;
        let flags = opts.flags();

        if opts.width() == 0 || opts.height() == 0 {
            return Err(EncodeErrors::InvalidParameter(
                "image dimensions must be nonzero".to_string()
            ));
        }
        if opts.width() > 65535 || opts.height() > 65535 {
            return Err(EncodeErrors::Overflow("dimension beyond 16 bits"));
        }
        if !(1..=16).contains(&opts.precision()) {
            return Err(EncodeErrors::Overflow("precision must be within 1..=16"));
        }
        if !(1..=100).contains(&opts.quality()) {
            return Err(EncodeErrors::InvalidParameter(format!(
                "quality {} out of range 1..=100",
                opts.quality()
            )));
        }
        if opts.hdr_quality() > 100 {
            return Err(EncodeErrors::InvalidParameter(format!(
                "hdr quality {} out of range 0..=100",
                opts.hdr_quality()
            )));
        }
        if opts.restart_interval() > 65535 {
            return Err(EncodeErrors::Overflow(
                "restart interval must be within 0..=65535"
            ));
        }
        if opts.hidden_dct_bits() > 4 {
            return Err(EncodeErrors::InvalidParameter(format!(
                "hidden coefficient bits {} out of range 0..=4",
                opts.hidden_dct_bits()
            )));
        }

        let num_components = opts.colorspace().num_components();
        if !matches!(opts.colorspace(), ColorSpace::RGB | ColorSpace::Luma) {
            return Err(EncodeErrors::InvalidParameter(format!(
                "cannot encode from colorspace {:?}",
                opts.colorspace()
            )));
        }

        if !opts.subsampling().is_empty() {
            if opts.subsampling().len() != num_components {
                return Err(EncodeErrors::InvalidParameter(
                    "subsampling factors must cover every component".to_string()
                ));
            }
            for &(h, v) in opts.subsampling() {
                if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                    return Err(EncodeErrors::InvalidParameter(format!(
                        "sampling factors ({h}, {v}) out of range 1..=4"
                    )));
                }
            }
        }

        if flags.pyramidal {
            return Err(EncodeErrors::NotInProfile(
                "hierarchical coding is not part of this profile"
            ));
        }
        if flags.reversible_dct && opts.hidden_dct_bits() > 0 {
            return Err(EncodeErrors::NotInProfile(
                "hidden bits combine only with the float DCT"
            ));
        }

        match opts.frame_kind() {
            FrameKind::Baseline => {
                let precision = if opts.tone_map().is_some() { 8 } else { opts.precision() };
                if precision != 8 {
                    return Err(EncodeErrors::InvalidParameter(
                        "baseline frames carry 8 bit samples".to_string()
                    ));
                }
            }
            FrameKind::Sequential | FrameKind::Progressive => {
                if opts.precision() > 12 && opts.tone_map().is_none() {
                    return Err(EncodeErrors::InvalidParameter(
                        "DCT frames carry at most 12 bit samples".to_string()
                    ));
                }
            }
            FrameKind::Lossless | FrameKind::JpegLs => {
                if opts.point_transform() >= opts.precision() {
                    return Err(EncodeErrors::InvalidParameter(
                        "point transform consumes the whole precision".to_string()
                    ));
                }
            }
        }

        if opts.error_bound() > 0 && opts.frame_kind() != FrameKind::JpegLs {
            return Err(EncodeErrors::InvalidParameter(
                "an error bound needs the near-lossless frame kind".to_string()
            ));
        }

        if matches!(self.source, SourcePixels::F32(_)) && opts.tone_map().is_none() {
            return Err(EncodeErrors::InvalidParameter(
                "float sources need a tone mapping".to_string()
            ));
        }
        if opts.tone_map().is_some() && flags.residual_coding && opts.hdr_quality() < 100 {
            return Err(EncodeErrors::NotInProfile(
                "HDR residual layers are coded losslessly in this profile"
            ));
        }

        if !opts.scans().is_empty() {
            validate_scan_script(opts.scans(), num_components, opts.hidden_dct_bits())?;
        }

        if !opts.quant_tables().is_empty() {
            if flags.reversible_dct {
                // the reversible path needs unity steps; honoring a custom
                // table here would silently break exactness
                return Err(EncodeErrors::InvalidParameter(
                    "custom quantization tables cannot combine with the reversible DCT"
                        .to_string()
                ));
            }
            if opts.quant_tables().len() > 2 {
                return Err(EncodeErrors::InvalidParameter(
                    "at most two custom quantization tables are used".to_string()
                ));
            }
            for table in opts.quant_tables() {
                crate::quant::validate_table(table)?;
            }
        }

        let expected = opts.width() * opts.height() * num_components;
        let found = match &self.source {
            SourcePixels::U8(d) => d.len(),
            SourcePixels::U16(d) => d.len(),
            SourcePixels::F32(d) => d.len()
        };
        if expected != found {
            return Err(EncodeErrors::LengthMismatch(expected, found));
        }

        Ok(())
    }

    /// Split the interleaved source into one plane per component.
    fn deinterleave(&self, num_components: usize) -> Result<Vec<Vec<u16>>, EncodeErrors> {
        let pixels = self.options.width() * self.options.height();
        let mut planes = vec![vec![0_u16; pixels]; num_components];

        match &self.source {
            SourcePixels::U8(data) => {
                for (i, chunk) in data.chunks_exact(num_components).enumerate() {
                    for (c, &v) in chunk.iter().enumerate() {
                        planes[c][i] = u16::from(v);
                    }
                }
            }
            SourcePixels::U16(data) => {
                for (i, chunk) in data.chunks_exact(num_components).enumerate() {
                    for (c, &v) in chunk.iter().enumerate() {
                        planes[c][i] = v;
                    }
                }
            }
            SourcePixels::F32(data) => {
                for (i, chunk) in data.chunks_exact(num_components).enumerate() {
                    for (c, &v) in chunk.iter().enumerate() {
                        planes[c][i] = f32_to_f16_bits(v);
                    }
                }
            }
        }
        Ok(planes)
    }

    fn base_transform_kind(&self, num_components: usize) -> ColorTransformKind {
        if num_components < 3 {
            return ColorTransformKind::None;
        }
        self.options.color_transform().clone()
    }

    /// Downsample, pad and forward transform the planes into coefficient
    /// planes.
    fn prepare_dct(
        &self, planes: &[Vec<u16>], precision: u8
    ) -> Result<EncodeState, EncodeErrors> {
        let opts = &self.options;
        let width = opts.width();
        let height = opts.height();
        let flags = opts.flags();
        let num_components = planes.len();

        let sampling: Vec<(usize, usize)> = if opts.subsampling().is_empty() {
            vec![(1, 1); num_components]
        } else {
            opts.subsampling()
                .iter()
                .map(|&(h, v)| (usize::from(h), usize::from(v)))
                .collect()
        };

        let h_max = sampling.iter().map(|s| s.0).max().unwrap_or(1);
        let v_max = sampling.iter().map(|s| s.1).max().unwrap_or(1);
        let mcu_x = width.div_ceil(8 * h_max);
        let mcu_y = height.div_ceil(8 * v_max);

        let quality = opts.quality();
        let qt = if flags.reversible_dct {
            // the lifting transform inverts exactly only over unity steps,
            // so the reversible path pins every table to ones and the
            // quality knob has no say
            vec![[1_u16; 64]; if num_components > 1 { 2 } else { 1 }]
        } else if opts.quant_tables().is_empty() {
            let mut qt = vec![scale_quality(&DEFAULT_LUMA_QT, quality)];
            if num_components > 1 {
                qt.push(scale_quality(&DEFAULT_CHROMA_QT, quality));
            }
            qt
        } else {
            opts.quant_tables().to_vec()
        };

        let sof = frame_marker(opts.frame_kind(), flags.arithmetic);
        let hidden = opts.hidden_dct_bits();
        let half = 1_i32 << (precision - 1);

        let mut comps = Vec::with_capacity(num_components);
        for (index, plane) in planes.iter().enumerate() {
            let (h, v) = sampling[index];
            let comp_width = (width * h).div_ceil(h_max);
            let comp_height = (height * v).div_ceil(v_max);
            let width_stride = mcu_x * h * 8;
            let height_stride = mcu_y * v * 8;
            let qt_slot = usize::from(index > 0 && qt.len() > 1);

            // area-average downsample, then pad with edge replication
            let reduced = if h == h_max && v == v_max {
                let mut out = vec![0_u16; comp_width * comp_height];
                for y in 0..comp_height {
                    out[y * comp_width..(y + 1) * comp_width]
                        .copy_from_slice(&plane[y * width..y * width + comp_width]);
                }
                out
            } else {
                downsample_plane(plane, width, height, h_max / h, v_max / v, comp_width, comp_height)
            };

            let mut samples = vec![0_u16; width_stride * height_stride];
            for y in 0..height_stride {
                let sy = y.min(comp_height - 1);
                for x in 0..width_stride {
                    let sx = x.min(comp_width - 1);
                    samples[y * width_stride + x] = reduced[sy * comp_width + sx];
                }
            }

            let mut comp = CompPlane {
                h,
                v,
                width: comp_width,
                height: comp_height,
                width_stride,
                height_stride,
                qt_slot,
                dc_slot: qt_slot,
                ac_slot: qt_slot,
                samples,
                coeffs: vec![0; width_stride * height_stride],
                dc_pred: 0
            };

            forward_transform_plane(
                &mut comp,
                &qt[qt_slot],
                flags.reversible_dct,
                hidden,
                flags.optimize_huffman,
                opts.dead_zone(),
                half
            );

            comps.push(comp);
        }

        Ok(EncodeState {
            width,
            height,
            precision,
            h_max,
            v_max,
            mcu_x,
            mcu_y,
            sof,
            comps,
            qt,
            hidden,
            reversible: flags.reversible_dct
        })
    }

    /// Emit the DCT frame: tables, frame header, scans. Returns the
    /// hidden refinement payload when hidden bits are in use.
    fn encode_dct<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, state: &mut EncodeState
    ) -> Result<Option<Vec<u8>>, EncodeErrors> {
        let opts = &self.options;
        let flags = opts.flags();
        let progressive = opts.frame_kind() == FrameKind::Progressive;

        write_dqt(writer, &state.qt)?;
        let declared_height = if opts.write_dnl() && !progressive && !flags.arithmetic {
            0
        } else {
            state.height
        };
        write_sof(writer, state, declared_height)?;

        if flags.arithmetic {
            write_dac(writer, state.comps.len())?;
        }
        if opts.restart_interval() > 0 && !(flags.arithmetic && progressive) {
            // restart markers inside arithmetic progressive scans are not
            // emitted, so the interval is not declared either
            write_dri(writer, opts.restart_interval())?;
        }

        let script: Vec<ScanSpec> = if progressive {
            let mut script = if opts.scans().is_empty() {
                default_progressive_script(state.comps.len())
            } else {
                opts.scans().to_vec()
            };
            if state.hidden > 0 {
                for scan in &mut script {
                    scan.al += state.hidden;
                    if scan.ah > 0 {
                        scan.ah += state.hidden;
                    }
                }
            }
            script
        } else {
            vec![]
        };

        if flags.arithmetic {
            if progressive {
                self.encode_progressive_arith(writer, state, &script)?;
            } else {
                self.encode_sequential_arith(writer, state)?;
            }
        } else {
            let tables = self.build_tables(state, progressive, &script)?;
            write_dht(writer, &tables)?;

            if progressive {
                self.encode_progressive_huffman(writer, state, &script, &tables)?;
            } else {
                self.encode_sequential_huffman(writer, state, &tables)?;
                if declared_height == 0 {
                    write_dnl(writer, state.height)?;
                }
            }
        }

        if state.hidden > 0 {
            return Ok(Some(encode_refinement_payload(state)?));
        }
        Ok(None)
    }

    /// Default or measured Huffman tables: one DC/AC pair per table
    /// class.
    fn build_tables(
        &self, state: &EncodeState, progressive: bool, script: &[ScanSpec]
    ) -> Result<Vec<(HuffmanEncTable, HuffmanEncTable)>, EncodeErrors> {
        let classes = state.qt.len();

        // progressive scans emit EOB-run symbols the default tables do not
        // carry, and precisions above 8 bits overrun their categories, so
        // both force the measurement pass
        let optimize =
            self.options.flags().optimize_huffman || progressive || state.precision > 8;

        if !optimize {
            let mut tables = vec![(
                HuffmanEncTable::new(&LUMA_DC_BITS, LUMA_DC_VALUES)
                    .map_err(|_| EncodeErrors::PhaseError("default table build"))?,
                HuffmanEncTable::new(&LUMA_AC_BITS, LUMA_AC_VALUES)
                    .map_err(|_| EncodeErrors::PhaseError("default table build"))?
            )];
            if classes > 1 {
                tables.push((
                    HuffmanEncTable::new(&CHROMA_DC_BITS, CHROMA_DC_VALUES)
                        .map_err(|_| EncodeErrors::PhaseError("default table build"))?,
                    HuffmanEncTable::new(&CHROMA_AC_BITS, CHROMA_AC_VALUES)
                        .map_err(|_| EncodeErrors::PhaseError("default table build"))?
                ));
            }
            return Ok(tables);
        }

        // measurement pass: identical walk, counting sink
        let mut dc_freq = vec![[0_u32; 256]; classes];
        let mut ac_freq = vec![[0_u32; 256]; classes];

        if progressive {
            measure_progressive(state, script, self.options.restart_interval(), &mut dc_freq, &mut ac_freq)?;
        } else {
            measure_sequential(state, self.options.restart_interval(), &mut dc_freq, &mut ac_freq)?;
        }

        let mut tables = Vec::with_capacity(classes);
        for class in 0..classes {
            let (dc_bits, dc_values) = build_optimal_table(&dc_freq[class]);
            let (ac_bits, ac_values) = build_optimal_table(&ac_freq[class]);
            tables.push((
                HuffmanEncTable::new(&dc_bits, &dc_values)
                    .map_err(|_| EncodeErrors::PhaseError("optimized table out of shape"))?,
                HuffmanEncTable::new(&ac_bits, &ac_values)
                    .map_err(|_| EncodeErrors::PhaseError("optimized table out of shape"))?
            ));
        }
        trace!("huffman tables rebuilt from measured frequencies");
        Ok(tables)
    }

    fn encode_sequential_huffman<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, state: &mut EncodeState,
        tables: &[(HuffmanEncTable, HuffmanEncTable)]
    ) -> Result<(), EncodeErrors> {
        let components: Vec<u8> = (0..state.comps.len() as u8).collect();
        write_sos(writer, state, &components, 0, 63, 0, 0)?;

        for comp in &mut state.comps {
            comp.dc_pred = 0;
        }

        let restart_interval = self.options.restart_interval();
        let hidden = state.hidden;
        let mut bits = BitWriter::new(writer);
        let mut todo = if restart_interval == 0 { usize::MAX } else { restart_interval };
        let mut restart_count = 0_usize;

        for mcu_y in 0..state.mcu_y {
            for mcu_x in 0..state.mcu_x {
                for comp in &mut state.comps {
                    let (dc, ac) = &tables[comp.qt_slot.min(tables.len() - 1)];
                    for v in 0..comp.v {
                        for h in 0..comp.h {
                            let bx = mcu_x * comp.h + h;
                            let by = mcu_y * comp.v + v;
                            let block = visible_block(comp.block(bx, by), hidden);
                            scan_encode::encode_block_sequential(
                                &mut bits, dc, ac, &block, &mut comp.dc_pred
                            )?;
                        }
                    }
                }

                todo = todo.saturating_sub(1);
                if todo == 0 && restart_interval > 0 && !(mcu_y == state.mcu_y - 1 && mcu_x == state.mcu_x - 1)
                {
                    bits.write_restart(restart_count)?;
                    restart_count += 1;
                    todo = restart_interval;
                    for comp in &mut state.comps {
                        comp.dc_pred = 0;
                    }
                }
            }
        }

        bits.flush_with_ones()?;
        Ok(())
    }

    fn encode_sequential_arith<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, state: &mut EncodeState
    ) -> Result<(), EncodeErrors> {
        let components: Vec<u8> = (0..state.comps.len() as u8).collect();
        write_sos(writer, state, &components, 0, 63, 0, 0)?;

        for comp in &mut state.comps {
            comp.dc_pred = 0;
        }

        let restart_interval = self.options.restart_interval();
        let hidden = state.hidden;
        let num = state.comps.len();

        let mut coder = ArithEncoder::new();
        let mut dc_ctx: Vec<DcContexts> = (0..num).map(|_| DcContexts::new(0, 1)).collect();
        let mut ac_ctx: Vec<AcContexts> = (0..num).map(|_| AcContexts::new(5)).collect();
        let mut prev_diff = vec![0_i32; num];
        let mut todo = if restart_interval == 0 { usize::MAX } else { restart_interval };
        let mut restart_count = 0_usize;

        for mcu_y in 0..state.mcu_y {
            for mcu_x in 0..state.mcu_x {
                for (index, comp) in state.comps.iter_mut().enumerate() {
                    for v in 0..comp.v {
                        for h in 0..comp.h {
                            let bx = mcu_x * comp.h + h;
                            let by = mcu_y * comp.v + v;
                            let block = visible_block(comp.block(bx, by), hidden);

                            let diff = block[0] - comp.dc_pred;
                            comp.dc_pred = block[0];
                            arith::encode_dc_diff(
                                &mut coder, &mut dc_ctx[index], diff, prev_diff[index]
                            );
                            prev_diff[index] = diff;
                            arith::encode_ac_band(&mut coder, &mut ac_ctx[index], &block, 1, 63);
                        }
                    }
                }

                todo = todo.saturating_sub(1);
                if todo == 0
                    && restart_interval > 0
                    && !(mcu_y == state.mcu_y - 1 && mcu_x == state.mcu_x - 1)
                {
                    let finished = core::mem::take(&mut coder).finish();
                    write_stuffed(writer, &finished)?;
                    writer.write_u16_be(0xffd0 + (restart_count % 8) as u16)?;
                    restart_count += 1;
                    todo = restart_interval;
                    for comp in &mut state.comps {
                        comp.dc_pred = 0;
                    }
                    prev_diff = vec![0; num];
                }
            }
        }

        let finished = coder.finish();
        write_stuffed(writer, &finished)?;
        Ok(())
    }

    fn encode_progressive_huffman<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, state: &mut EncodeState, script: &[ScanSpec],
        tables: &[(HuffmanEncTable, HuffmanEncTable)]
    ) -> Result<(), EncodeErrors> {
        let restart_interval = self.options.restart_interval();

        for scan in script {
            let members = scan_members(scan, state.comps.len());
            write_sos(writer, state, &members, scan.ss, scan.se, scan.ah, scan.al)?;

            for comp in &mut state.comps {
                comp.dc_pred = 0;
            }

            let mut bits = BitWriter::new(writer);
            let mut ac_state = AcScanState::default();
            let mut todo = if restart_interval == 0 { usize::MAX } else { restart_interval };
            let mut restart_count = 0_usize;

            if scan.ss == 0 {
                // DC scans walk the full MCU grid, interleaved
                for mcu_y in 0..state.mcu_y {
                    for mcu_x in 0..state.mcu_x {
                        for &index in &members {
                            let comp = &mut state.comps[usize::from(index)];
                            let (dc, _) = &tables[comp.qt_slot.min(tables.len() - 1)];
                            for v in 0..comp.v {
                                for h in 0..comp.h {
                                    let block =
                                        comp.block(mcu_x * comp.h + h, mcu_y * comp.v + v);
                                    let block = *block;
                                    let mut sink = HuffWriter {
                                        dc,
                                        ac: dc,
                                        out: &mut bits
                                    };
                                    if scan.ah == 0 {
                                        scan_encode::encode_dc_first(
                                            &mut sink, &block, &mut comp.dc_pred, scan.al
                                        )?;
                                    } else {
                                        scan_encode::encode_dc_refine(&mut sink, &block, scan.al)?;
                                    }
                                }
                            }
                        }

                        todo = todo.saturating_sub(1);
                        if todo == 0
                            && restart_interval > 0
                            && !(mcu_y == state.mcu_y - 1 && mcu_x == state.mcu_x - 1)
                        {
                            bits.write_restart(restart_count)?;
                            restart_count += 1;
                            todo = restart_interval;
                            for comp in &mut state.comps {
                                comp.dc_pred = 0;
                            }
                        }
                    }
                }
            } else {
                // AC scans cover one component, block by block
                let index = usize::from(members[0]);
                let comp = &mut state.comps[index];
                let (_, ac) = &tables[comp.qt_slot.min(tables.len() - 1)];
                let blocks_w = comp.width.div_ceil(8);
                let blocks_h = comp.height.div_ceil(8);

                for by in 0..blocks_h {
                    for bx in 0..blocks_w {
                        let block = *comp.block(bx, by);
                        let mut sink = HuffWriter {
                            dc: ac,
                            ac,
                            out: &mut bits
                        };
                        if scan.ah == 0 {
                            scan_encode::encode_ac_first(
                                &mut sink, &mut ac_state, &block, scan.ss, scan.se, scan.al
                            )?;
                        } else {
                            scan_encode::encode_ac_refine(
                                &mut sink, &mut ac_state, &block, scan.ss, scan.se, scan.al
                            )?;
                        }

                        todo = todo.saturating_sub(1);
                        if todo == 0
                            && restart_interval > 0
                            && !(by == blocks_h - 1 && bx == blocks_w - 1)
                        {
                            let mut sink = HuffWriter {
                                dc: ac,
                                ac,
                                out: &mut bits
                            };
                            ac_state.flush_eob_run(&mut sink)?;
                            bits.write_restart(restart_count)?;
                            restart_count += 1;
                            todo = restart_interval;
                        }
                    }
                }
            }

            // pending EOB runs close with the scan
            {
                let class = if scan.ss == 0 {
                    0
                } else {
                    state.comps[usize::from(members[0])].qt_slot.min(tables.len() - 1)
                };
                let (dc, ac) = &tables[class];
                let mut sink = HuffWriter {
                    dc,
                    ac,
                    out: &mut bits
                };
                ac_state.flush_eob_run(&mut sink)?;
            }
            bits.flush_with_ones()?;
        }
        Ok(())
    }

    fn encode_progressive_arith<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, state: &mut EncodeState, script: &[ScanSpec]
    ) -> Result<(), EncodeErrors> {
        for scan in script {
            let members = scan_members(scan, state.comps.len());
            write_sos(writer, state, &members, scan.ss, scan.se, scan.ah, scan.al)?;

            for comp in &mut state.comps {
                comp.dc_pred = 0;
            }

            let num = state.comps.len();
            let mut coder = ArithEncoder::new();
            let mut dc_ctx: Vec<DcContexts> = (0..num).map(|_| DcContexts::new(0, 1)).collect();
            let mut ac_ctx: Vec<AcContexts> = (0..num).map(|_| AcContexts::new(5)).collect();
            let mut prev_diff = vec![0_i32; num];

            if scan.ss == 0 {
                for mcu_y in 0..state.mcu_y {
                    for mcu_x in 0..state.mcu_x {
                        for &index in &members {
                            let comp = &mut state.comps[usize::from(index)];
                            for v in 0..comp.v {
                                for h in 0..comp.h {
                                    let block =
                                        *comp.block(mcu_x * comp.h + h, mcu_y * comp.v + v);
                                    if scan.ah == 0 {
                                        let value = block[0] >> scan.al;
                                        let diff = value - comp.dc_pred;
                                        comp.dc_pred = value;
                                        arith::encode_dc_diff(
                                            &mut coder,
                                            &mut dc_ctx[usize::from(index)],
                                            diff,
                                            prev_diff[usize::from(index)]
                                        );
                                        prev_diff[usize::from(index)] = diff;
                                    } else {
                                        coder.encode_fixed(((block[0] >> scan.al) & 1) as u8);
                                    }
                                }
                            }
                        }
                    }
                }
            } else {
                let index = usize::from(members[0]);
                let comp = &state.comps[index];
                let blocks_w = comp.width.div_ceil(8);
                let blocks_h = comp.height.div_ceil(8);

                for by in 0..blocks_h {
                    for bx in 0..blocks_w {
                        let block = *state.comps[index].block(bx, by);
                        if scan.ah == 0 {
                            let mut shifted = [0_i32; 64];
                            for (dst, &src) in shifted.iter_mut().zip(block.iter()) {
                                *dst = if src < 0 {
                                    -((-src) >> scan.al)
                                } else {
                                    src >> scan.al
                                };
                            }
                            arith::encode_ac_band(
                                &mut coder,
                                &mut ac_ctx[index],
                                &shifted,
                                usize::from(scan.ss),
                                usize::from(scan.se)
                            );
                        } else {
                            arith::encode_ac_refine_band(
                                &mut coder,
                                &mut ac_ctx[index],
                                &block,
                                usize::from(scan.ss),
                                usize::from(scan.se),
                                scan.al
                            );
                        }
                    }
                }
            }

            let finished = coder.finish();
            write_stuffed(writer, &finished)?;
        }
        Ok(())
    }

    /// Emit a full predictive (lossless / near lossless) codestream body.
    fn encode_predictive<W: XtWriterTrait>(
        &self, writer: &mut XtWriter<W>, planes: &mut [Vec<u16>], precision: u8
    ) -> Result<(), EncodeErrors> {
        let opts = &self.options;
        let flags = opts.flags();
        let width = opts.width();
        let height = opts.height();
        let pt = opts.point_transform();
        let near = i32::from(opts.error_bound());
        let predictor = if opts.frame_kind() == FrameKind::JpegLs { 4 } else { 1 };

        // apply the point transform up front
        if pt > 0 {
            for plane in planes.iter_mut() {
                for value in plane.iter_mut() {
                    *value >>= pt;
                }
            }
        }

        let sof = if flags.arithmetic {
            SofMarker::LosslessArithmetic
        } else {
            SofMarker::LosslessHuffman
        };

        // frame header
        let num_components = planes.len();
        writer.write_u16_be(0xffc0 + u16::from(sof.sof_index()))?;
        writer.write_u16_be(8 + 3 * num_components as u16)?;
        writer.write_u8(precision)?;
        writer.write_u16_be(height as u16)?;
        writer.write_u16_be(width as u16)?;
        writer.write_u8(num_components as u8)?;
        for index in 0..num_components {
            writer.write_u8(index as u8 + 1)?;
            writer.write_u8(0x11)?;
            writer.write_u8(0)?;
        }

        let dc_table = if flags.arithmetic {
            None
        } else if flags.optimize_huffman || precision > 8 {
            // wide precisions produce difference categories the default
            // table does not carry, so those always measure
            let mut freq = [0_u32; 256];
            let mut probe = planes.to_vec();
            crate::lossless::count_scan(&mut probe, width, height, precision, pt, predictor, near, &mut freq)?;
            let (bits, values) = build_optimal_table(&freq);
            Some(
                HuffmanEncTable::new(&bits, &values)
                    .map_err(|_| EncodeErrors::PhaseError("optimized table out of shape"))?
            )
        } else {
            Some(
                HuffmanEncTable::new(&LUMA_DC_BITS, LUMA_DC_VALUES)
                    .map_err(|_| EncodeErrors::PhaseError("default table build"))?
            )
        };

        if let Some(table) = &dc_table {
            write_single_dht(writer, 0, false, table)?;
        }

        // scan header: all components, predictor in Ss, Pt in Al
        writer.write_u16_be(0xffda)?;
        writer.write_u16_be(6 + 2 * num_components as u16)?;
        writer.write_u8(num_components as u8)?;
        for index in 0..num_components {
            writer.write_u8(index as u8 + 1)?;
            writer.write_u8(0x00)?;
        }
        writer.write_u8(predictor)?;
        writer.write_u8(0)?;
        writer.write_u8(pt)?;

        crate::lossless::encode_scan(
            writer,
            planes,
            width,
            height,
            precision,
            pt,
            predictor,
            near,
            flags.arithmetic,
            dc_table.as_ref()
        )?;

        // restore the reconstructed planes to output precision
        if pt > 0 {
            for plane in planes.iter_mut() {
                for value in plane.iter_mut() {
                    *value <<= pt;
                }
            }
        }
        Ok(())
    }

    /// Rebuild the decoder-visible reconstruction from the coefficient
    /// planes: inverse transform, upsample, inverse color transform.
    fn reconstruct(
        &self, state: &EncodeState, precision: u8, num_components: usize
    ) -> Result<Vec<Vec<u16>>, EncodeErrors> {
        let half = 1_i32 << (precision - 1);
        let max_sample = (1_i32 << precision) - 1;
        let width = state.width;
        let height = state.height;

        let mut planes = Vec::with_capacity(state.comps.len());
        for comp in &state.comps {
            let kernel = kernel_for(
                &state.qt[comp.qt_slot],
                state.reversible,
                state.hidden,
                false,
                false
            );

            let stride = comp.width_stride;
            let mut samples = vec![0_u16; stride * comp.height_stride];
            let mut pixels = [0_i32; 64];

            for by in 0..comp.height_stride / 8 {
                for bx in 0..comp.blocks_per_row() {
                    kernel.inverse(comp.block(bx, by), &mut pixels, half);
                    for row in 0..8 {
                        let dst = (by * 8 + row) * stride + bx * 8;
                        for (offset, &value) in pixels[row * 8..row * 8 + 8].iter().enumerate() {
                            samples[dst + offset] = value.clamp(0, max_sample) as u16;
                        }
                    }
                }
            }

            // to full resolution; this must take the exact branches the
            // decoder takes or the residual stops cancelling
            let full = if state.h_max % comp.h != 0 || state.v_max % comp.v != 0 {
                let mut out = vec![0_u16; width * height];
                for y in 0..height {
                    let sy = (y * comp.height / height).min(comp.height - 1);
                    for x in 0..width {
                        let sx = (x * comp.width / width).min(comp.width - 1);
                        out[y * width + x] = samples[sy * stride + sx];
                    }
                }
                out
            } else if comp.h == state.h_max && comp.v == state.v_max {
                let mut out = vec![0_u16; width * height];
                for y in 0..height {
                    out[y * width..(y + 1) * width]
                        .copy_from_slice(&samples[y * stride..y * stride + width]);
                }
                out
            } else {
                crate::upsampler::upsample_plane(
                    &samples,
                    stride,
                    comp.height,
                    state.h_max / comp.h,
                    state.v_max / comp.v,
                    width,
                    height
                )
            };
            planes.push(full);
        }

        // invert the color transform to reach the source domain
        let transform_kind = self.base_transform_kind(num_components);
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
        Ok(planes)
    }

    /// The residual planes: source minus base reconstruction, offset to
    /// the unsigned domain.
    fn residual_planes(
        &self, recon: &[Vec<u16>], hdr: Option<&[Vec<u16>]>, tone_map: Option<&ToneMap>,
        num_components: usize
    ) -> Result<Vec<Vec<u16>>, EncodeErrors> {
        let modular = self.options.hdr_quality() >= 100;

        // the domain the residual lives in
        let (source, predicted): (Vec<Vec<u16>>, Vec<Vec<u16>>) = if let Some(map) = tone_map {
            let hdr = hdr.ok_or(EncodeErrors::PhaseError("missing HDR planes"))?;
            let lifted: Vec<Vec<u16>> = recon
                .iter()
                .map(|plane| plane.iter().map(|&v| map.lift(v)).collect())
                .collect();
            (hdr.to_vec(), lifted)
        } else {
            (self.deinterleave(num_components)?, recon.to_vec())
        };

        let (modulo, half): (i64, i64) = if tone_map.is_some() {
            (1 << 16, 1 << 15)
        } else {
            (1_i64 << self.options.precision(), 1_i64 << (self.options.precision() - 1))
        };

        let mut residual = Vec::with_capacity(source.len());
        for (src_plane, pred_plane) in source.iter().zip(predicted.iter()) {
            let mut out = Vec::with_capacity(src_plane.len());
            for (&s, &p) in src_plane.iter().zip(pred_plane.iter()) {
                let diff = i64::from(s) - i64::from(p) + half;
                let value = if modular {
                    diff.rem_euclid(modulo)
                } else {
                    diff.clamp(0, modulo - 1)
                };
                out.push(value as u16);
            }
            residual.push(out);
        }
        Ok(residual)
    }

    /// Encode the residual planes as their own complete codestream.
    fn encode_residual_stream(
        &self, planes: Vec<Vec<u16>>, hdr: bool
    ) -> Result<Vec<u8>, EncodeErrors> {
        let precision = if hdr { 16 } else { self.options.precision() };
        let hdr_quality = self.options.hdr_quality();
        let num_components = planes.len();

        // interleave back into a contiguous buffer for the inner encoder
        let mut interleaved = vec![0_u16; planes[0].len() * num_components];
        for (c, plane) in planes.iter().enumerate() {
            for (i, &v) in plane.iter().enumerate() {
                interleaved[i * num_components + c] = v;
            }
        }

        let colorspace = if num_components == 1 {
            ColorSpace::Luma
        } else {
            ColorSpace::RGB
        };

        let mut options = EncoderOptions::new(
            self.options.width(),
            self.options.height(),
            colorspace,
            precision
        )
        .set_color_transform(ColorTransformKind::None);

        options = if hdr_quality >= 100 {
            options.set_frame_kind(FrameKind::Lossless)
        } else {
            // a lossy residual layer rides on the sequential DCT; the dead
            // zone swallows the near-zero residual noise
            options
                .set_frame_kind(FrameKind::Sequential)
                .set_quality(hdr_quality.max(1))
                .set_dead_zone(true)
        };

        let encoder = JxtEncoder::new_u16(&interleaved, options);
        encoder.encode_to_vec()
    }
}

/// The SOF marker for a frame kind.
fn frame_marker(kind: FrameKind, arithmetic: bool) -> SofMarker {
    match (kind, arithmetic) {
        (FrameKind::Baseline, false) => SofMarker::BaselineDct,
        (FrameKind::Baseline | FrameKind::Sequential, true) => {
            SofMarker::ExtendedSequentialArithmetic
        }
        (FrameKind::Sequential, false) => SofMarker::ExtendedSequentialHuffman,
        (FrameKind::Progressive, false) => SofMarker::ProgressiveDctHuffman,
        (FrameKind::Progressive, true) => SofMarker::ProgressiveDctArithmetic,
        (FrameKind::Lossless | FrameKind::JpegLs, false) => SofMarker::LosslessHuffman,
        (FrameKind::Lossless | FrameKind::JpegLs, true) => SofMarker::LosslessArithmetic
    }
}

/// The default spectral selection script, seven scans for color images.
fn default_progressive_script(num_components: usize) -> Vec<ScanSpec> {
    let all = ((1_u16 << num_components) - 1) as u8;

    let mut script = vec![
        // everything gets its DC up front
        ScanSpec { components: all, ss: 0, se: 0, ah: 0, al: 0 },
        // a rough luma preview band
        ScanSpec { components: 1, ss: 1, se: 5, ah: 0, al: 2 },
    ];
    if num_components >= 3 {
        script.push(ScanSpec { components: 1 << 1, ss: 1, se: 63, ah: 0, al: 0 });
        script.push(ScanSpec { components: 1 << 2, ss: 1, se: 63, ah: 0, al: 0 });
    }
    script.push(ScanSpec { components: 1, ss: 6, se: 63, ah: 0, al: 2 });
    script.push(ScanSpec { components: 1, ss: 1, se: 63, ah: 2, al: 1 });
    script.push(ScanSpec { components: 1, ss: 1, se: 63, ah: 1, al: 0 });
    script
}

fn validate_scan_script(
    script: &[ScanSpec], num_components: usize, _hidden: u8
) -> Result<(), EncodeErrors> {
    for scan in script {
        if scan.components == 0 || usize::from(scan.components) >= (1 << num_components) * 2 {
            return Err(EncodeErrors::InvalidParameter(format!(
                "scan component mask {:#x} out of range",
                scan.components
            )));
        }
        if scan.se > 63 || scan.ss > scan.se && !(scan.ss == 0 && scan.se == 0) {
            return Err(EncodeErrors::InvalidParameter(format!(
                "bad spectral band {}..={}",
                scan.ss, scan.se
            )));
        }
        if scan.ss > 0 && scan.components.count_ones() != 1 {
            return Err(EncodeErrors::InvalidParameter(
                "AC scans carry exactly one component".to_string()
            ));
        }
        if scan.ah != 0 && scan.ah != scan.al + 1 {
            return Err(EncodeErrors::InvalidParameter(format!(
                "refinement scan with Ah={} Al={}",
                scan.ah, scan.al
            )));
        }
        if scan.al > 13 {
            return Err(EncodeErrors::InvalidParameter(
                "successive approximation beyond 13 planes".to_string()
            ));
        }
    }
    Ok(())
}

/// Component indices selected by a scan's bitmask.
fn scan_members(scan: &ScanSpec, num_components: usize) -> Vec<u8> {
    (0..num_components as u8)
        .filter(|&c| scan.components & (1 << c) != 0)
        .collect()
}

/// The successive approximation view of a full precision block at plane
/// `hidden`: the DC shifts arithmetically, the AC by magnitude.
fn visible_block(block: &[i32; 64], hidden: u8) -> [i32; 64] {
    if hidden == 0 {
        return *block;
    }
    let mut out = [0_i32; 64];
    out[0] = block[0] >> hidden;
    for (dst, &src) in out.iter_mut().zip(block.iter()).skip(1) {
        *dst = if src < 0 {
            -((-src) >> hidden)
        } else {
            src >> hidden
        };
    }
    out
}

/// Forward transform one component plane into its coefficient plane.
#[allow(clippy::too_many_arguments)]
fn forward_transform_plane(
    comp: &mut CompPlane, table: &[u16; 64], reversible: bool, hidden: u8, optimize: bool,
    dead_zone: bool, half: i32
) {
    let rd_optimize = optimize && !reversible;
    let mut kernel = kernel_for(table, reversible, hidden, dead_zone, rd_optimize);
    let steps = kernel.steps();

    let stride = comp.width_stride;
    let blocks_per_row = comp.blocks_per_row();
    let mut source = [0_i32; 64];
    let mut target = [0_i32; 64];

    for by in 0..comp.height_stride / 8 {
        for bx in 0..blocks_per_row {
            for row in 0..8 {
                let src = (by * 8 + row) * stride + bx * 8;
                for col in 0..8 {
                    source[row * 8 + col] = i32::from(comp.samples[src + col]);
                }
            }

            kernel.forward(&source, &mut target, half);

            if rd_optimize {
                if let Some(unquantized) = kernel.unquantized() {
                    let lambda = estimate_critical_slope(unquantized);
                    let unquantized = *unquantized;
                    rd_optimize_block(&unquantized, &mut target, &steps, lambda);
                }
            }

            let offset = (by * blocks_per_row + bx) * 64;
            comp.coeffs[offset..offset + 64].copy_from_slice(&target);
        }
    }

    comp.samples = vec![];
}

/// The hidden refinement payload: bit planes `hidden-1..=0` of every
/// component, DC then AC, coded with the fixed refinement table.
fn encode_refinement_payload(state: &EncodeState) -> Result<Vec<u8>, EncodeErrors> {
    let ac_table = HuffmanEncTable::new(&REFINEMENT_AC_BITS, REFINEMENT_AC_VALUES)
        .map_err(|_| EncodeErrors::PhaseError("refinement table build"))?;

    let mut payload = vec![];
    {
        let mut writer = XtWriter::new(&mut payload);
        let mut bits = BitWriter::new(&mut writer);

        for al in (0..state.hidden).rev() {
            // DC plane of every component
            for comp in &state.comps {
                for by in 0..comp.height.div_ceil(8) {
                    for bx in 0..comp.width.div_ceil(8) {
                        let block = comp.block(bx, by);
                        let mut sink = HuffWriter {
                            dc:  &ac_table,
                            ac:  &ac_table,
                            out: &mut bits
                        };
                        scan_encode::encode_dc_refine(&mut sink, block, al)?;
                    }
                }
            }

            // AC plane per component
            for comp in &state.comps {
                let mut ac_state = AcScanState::default();
                for by in 0..comp.height.div_ceil(8) {
                    for bx in 0..comp.width.div_ceil(8) {
                        let block = comp.block(bx, by);
                        let mut sink = HuffWriter {
                            dc:  &ac_table,
                            ac:  &ac_table,
                            out: &mut bits
                        };
                        scan_encode::encode_ac_refine(&mut sink, &mut ac_state, block, 1, 63, al)?;
                    }
                }
                let mut sink = HuffWriter {
                    dc:  &ac_table,
                    ac:  &ac_table,
                    out: &mut bits
                };
                ac_state.flush_eob_run(&mut sink)?;
            }
        }
        bits.flush_with_ones()?;
    }
    Ok(payload)
}

/// The measurement pass of a sequential frame.
fn measure_sequential(
    state: &EncodeState, restart_interval: usize, dc_freq: &mut [[u32; 256]],
    ac_freq: &mut [[u32; 256]]
) -> Result<(), EncodeErrors> {
    let mut preds = vec![0_i32; state.comps.len()];
    let mut todo = if restart_interval == 0 { usize::MAX } else { restart_interval };

    for mcu_y in 0..state.mcu_y {
        for mcu_x in 0..state.mcu_x {
            for (index, comp) in state.comps.iter().enumerate() {
                let class = comp.qt_slot.min(dc_freq.len() - 1);
                for v in 0..comp.v {
                    for h in 0..comp.h {
                        let block = visible_block(
                            comp.block(mcu_x * comp.h + h, mcu_y * comp.v + v),
                            state.hidden
                        );
                        scan_encode::count_block_sequential(
                            &mut dc_freq[class],
                            &mut ac_freq[class],
                            &block,
                            &mut preds[index]
                        )?;
                    }
                }
            }

            todo = todo.saturating_sub(1);
            if todo == 0 && restart_interval > 0 {
                todo = restart_interval;
                preds.iter_mut().for_each(|p| *p = 0);
            }
        }
    }
    Ok(())
}

/// The measurement pass of a progressive frame: runs the whole script
/// with counting sinks.
fn measure_progressive(
    state: &EncodeState, script: &[ScanSpec], restart_interval: usize,
    dc_freq: &mut [[u32; 256]], ac_freq: &mut [[u32; 256]]
) -> Result<(), EncodeErrors> {
    for scan in script {
        let members = scan_members(scan, state.comps.len());
        let mut preds = vec![0_i32; state.comps.len()];
        let mut ac_state = AcScanState::default();
        let mut todo = if restart_interval == 0 { usize::MAX } else { restart_interval };

        if scan.ss == 0 {
            if scan.ah != 0 {
                // refinement DC bits carry no symbols
                continue;
            }
            for mcu_y in 0..state.mcu_y {
                for mcu_x in 0..state.mcu_x {
                    for &index in &members {
                        let comp = &state.comps[usize::from(index)];
                        let class = comp.qt_slot.min(dc_freq.len() - 1);
                        for v in 0..comp.v {
                            for h in 0..comp.h {
                                let block = comp.block(mcu_x * comp.h + h, mcu_y * comp.v + v);
                                let mut unused = [0_u32; 256];
                                let mut sink = FreqCounter {
                                    dc: &mut dc_freq[class],
                                    ac: &mut unused
                                };
                                scan_encode::encode_dc_first(
                                    &mut sink,
                                    block,
                                    &mut preds[usize::from(index)],
                                    scan.al
                                )?;
                            }
                        }
                    }
                    todo = todo.saturating_sub(1);
                    if todo == 0 && restart_interval > 0 {
                        todo = restart_interval;
                        preds.iter_mut().for_each(|p| *p = 0);
                    }
                }
            }
        } else {
            let index = usize::from(members[0]);
            let comp = &state.comps[index];
            let class = comp.qt_slot.min(ac_freq.len() - 1);

            for by in 0..comp.height.div_ceil(8) {
                for bx in 0..comp.width.div_ceil(8) {
                    let block = comp.block(bx, by);
                    let mut unused = [0_u32; 256];
                    let mut sink = FreqCounter {
                        dc: &mut unused,
                        ac: &mut ac_freq[class]
                    };
                    if scan.ah == 0 {
                        scan_encode::encode_ac_first(
                            &mut sink, &mut ac_state, block, scan.ss, scan.se, scan.al
                        )?;
                    } else {
                        scan_encode::encode_ac_refine(
                            &mut sink, &mut ac_state, block, scan.ss, scan.se, scan.al
                        )?;
                    }
                    todo = todo.saturating_sub(1);
                    if todo == 0 && restart_interval > 0 {
                        let mut unused = [0_u32; 256];
                        let mut sink = FreqCounter {
                            dc: &mut unused,
                            ac: &mut ac_freq[class]
                        };
                        ac_state.flush_eob_run(&mut sink)?;
                        todo = restart_interval;
                    }
                }
            }
            let mut unused = [0_u32; 256];
            let mut sink = FreqCounter {
                dc: &mut unused,
                ac: &mut ac_freq[class]
            };
            ac_state.flush_eob_run(&mut sink)?;
        }
    }
    Ok(())
}

// ---- marker segment writers -------------------------------------------

fn write_dqt<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, tables: &[[u16; 64]]
) -> Result<(), EncodeErrors> {
    for (slot, table) in tables.iter().enumerate() {
        let sixteen_bit = table.iter().any(|&q| q > 255);
        let body = if sixteen_bit { 129 } else { 65 };

        writer.write_u16_be(0xffdb)?;
        writer.write_u16_be(2 + body)?;
        writer.write_u8((u8::from(sixteen_bit) << 4) | slot as u8)?;

        // entries travel in zig-zag order
        let mut zigzagged = [0_u16; 64];
        for natural in 0..64 {
            zigzagged[ZIGZAG[natural]] = table[natural];
        }
        for &q in &zigzagged {
            if sixteen_bit {
                writer.write_u16_be(q)?;
            } else {
                writer.write_u8(q as u8)?;
            }
        }
    }
    Ok(())
}

fn write_sof<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, state: &EncodeState, declared_height: usize
) -> Result<(), EncodeErrors> {
    writer.write_u16_be(0xffc0 + u16::from(state.sof.sof_index()))?;
    writer.write_u16_be(8 + 3 * state.comps.len() as u16)?;
    writer.write_u8(state.precision)?;
    writer.write_u16_be(declared_height as u16)?;
    writer.write_u16_be(state.width as u16)?;
    writer.write_u8(state.comps.len() as u8)?;

    for (index, comp) in state.comps.iter().enumerate() {
        writer.write_u8(index as u8 + 1)?;
        writer.write_u8(((comp.h as u8) << 4) | comp.v as u8)?;
        writer.write_u8(comp.qt_slot as u8)?;
    }
    Ok(())
}

fn write_dht<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, tables: &[(HuffmanEncTable, HuffmanEncTable)]
) -> Result<(), EncodeErrors> {
    for (slot, (dc, ac)) in tables.iter().enumerate() {
        write_single_dht(writer, slot as u8, false, dc)?;
        write_single_dht(writer, slot as u8, true, ac)?;
    }
    Ok(())
}

fn write_single_dht<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, slot: u8, is_ac: bool, table: &HuffmanEncTable
) -> Result<(), EncodeErrors> {
    writer.write_u16_be(0xffc4)?;
    writer.write_u16_be(2 + 1 + 16 + table.values.len() as u16)?;
    writer.write_u8((u8::from(is_ac) << 4) | slot)?;
    writer.write_all(&table.bits[1..17])?;
    writer.write_all(&table.values)?;
    Ok(())
}

/// Write the arithmetic conditioning the coder assumes.
fn write_dac<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, num_components: usize
) -> Result<(), EncodeErrors> {
    let slots = num_components.min(2) as u8;
    writer.write_u16_be(0xffcc)?;
    writer.write_u16_be(2 + 4 * u16::from(slots))?;
    for slot in 0..slots {
        // DC: L = 0, U = 1
        writer.write_u8(slot)?;
        writer.write_u8(0x10)?;
        // AC: Kx = 5
        writer.write_u8(0x10 | slot)?;
        writer.write_u8(5)?;
    }
    Ok(())
}

fn write_dri<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, interval: usize
) -> Result<(), EncodeErrors> {
    writer.write_u16_be(0xffdd)?;
    writer.write_u16_be(4)?;
    writer.write_u16_be(interval as u16)?;
    Ok(())
}

fn write_dnl<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, height: usize
) -> Result<(), EncodeErrors> {
    writer.write_u16_be(0xffdc)?;
    writer.write_u16_be(4)?;
    writer.write_u16_be(height as u16)?;
    Ok(())
}

fn write_sos<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, state: &EncodeState, members: &[u8], ss: u8, se: u8, ah: u8, al: u8
) -> Result<(), EncodeErrors> {
    writer.write_u16_be(0xffda)?;
    writer.write_u16_be(6 + 2 * members.len() as u16)?;
    writer.write_u8(members.len() as u8)?;
    for &index in members {
        let comp = &state.comps[usize::from(index)];
        writer.write_u8(index + 1)?;
        writer.write_u8(((comp.dc_slot as u8) << 4) | comp.ac_slot as u8)?;
    }
    writer.write_u8(ss)?;
    writer.write_u8(se)?;
    writer.write_u8((ah << 4) | al)?;
    Ok(())
}

/// Copy finished arithmetic coder bytes applying the 0xFF stuffing rule.
fn write_stuffed<W: XtWriterTrait>(
    writer: &mut XtWriter<W>, data: &[u8]
) -> Result<(), EncodeErrors> {
    for &byte in data {
        writer.write_u8(byte)?;
        if byte == 0xff {
            writer.write_u8(0x00)?;
        }
    }
    Ok(())
}
