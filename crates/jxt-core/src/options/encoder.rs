use crate::colorspace::ColorSpace;

/// The coding process of the base frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameKind {
    /// 8 bit sequential DCT, two table slots.
    Baseline,
    /// Extended sequential DCT, up to 12 bit samples.
    Sequential,
    /// Spectral selection / successive approximation scans.
    Progressive,
    /// Predictive lossless coding.
    Lossless,
    /// Predictive coding with a bounded per-sample error.
    JpegLs
}

/// Modifier flags combined with a [`FrameKind`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameFlags {
    /// Use the arithmetic entropy coder instead of Huffman coding.
    pub arithmetic:       bool,
    /// Hierarchical pyramid of frames.
    pub pyramidal:        bool,
    /// Append a residual codestream that makes the decode lossless.
    pub residual_coding:  bool,
    /// Use the integer lifting DCT instead of the float kernel.
    pub reversible_dct:   bool,
    /// Run a measurement pass and emit rate-optimized Huffman tables.
    pub optimize_huffman: bool
}

/// One scan of an explicit progressive scan script.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanSpec {
    /// Bitmask of component indices (bit 0 = component 0 …).
    pub components: u8,
    /// Spectral band start, `0..=63`.
    pub ss:         u8,
    /// Spectral band end, `ss..=63`.
    pub se:         u8,
    /// Successive approximation high bit. `0` on a first pass.
    pub ah:         u8,
    /// Successive approximation low bit; also the shift of a first pass.
    pub al:         u8
}

/// Selection of the sample-domain color transform.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ColorTransformKind {
    /// Pass samples through untouched.
    None,
    /// Full range BT.601 YCbCr, fixpoint.
    YCbCr,
    /// The reversible lifting transform, exact in integers.
    Rct,
    /// Free-form forward/inverse matrix pair for XYZ style workflows.
    FreeForm {
        forward: [[f32; 3]; 3],
        inverse: [[f32; 3]; 3]
    }
}

/// Tone mapping between the HDR sample domain and the 8 bit base layer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ToneMapSpec {
    /// Straight linear scaling between the two ranges.
    Linear,
    /// Gamma curve with an exposure factor, sRGB style knee.
    Gamma { gamma: f64, exposure: f64 }
}

/// Options that influence encoding. Covers the whole configuration surface
/// of the codec; unused knobs are ignored by frame kinds they do not apply
/// to.
#[derive(Clone, Debug)]
pub struct EncoderOptions {
    width:            usize,
    height:           usize,
    colorspace:       ColorSpace,
    precision:        u8,
    quality:          u8,
    hdr_quality:      u8,
    frame_kind:       FrameKind,
    flags:            FrameFlags,
    restart_interval: usize,
    subsampling:      Vec<(u8, u8)>,
    hidden_dct_bits:  u8,
    point_transform:  u8,
    scans:            Vec<ScanSpec>,
    color_transform:  ColorTransformKind,
    error_bound:      u16,
    write_dnl:        bool,
    tone_map:         Option<ToneMapSpec>,
    quant_tables:     Vec<[u16; 64]>,
    dead_zone:        bool
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            width:            0,
            height:           0,
            colorspace:       ColorSpace::RGB,
            precision:        8,
            quality:          80,
            hdr_quality:      100,
            frame_kind:       FrameKind::Baseline,
            flags:            FrameFlags::default(),
            restart_interval: 0,
            subsampling:      vec![],
            hidden_dct_bits:  0,
            point_transform:  0,
            scans:            vec![],
            color_transform:  ColorTransformKind::YCbCr,
            error_bound:      0,
            write_dnl:        false,
            tone_map:         None,
            quant_tables:     vec![],
            dead_zone:        false
        }
    }
}

impl EncoderOptions {
    #[must_use]
    pub fn new(
        width: usize, height: usize, colorspace: ColorSpace, precision: u8
    ) -> EncoderOptions {
        EncoderOptions {
            width,
            height,
            colorspace,
            precision,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn set_width(mut self, width: usize) -> EncoderOptions {
        self.width = width;
        self
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn set_height(mut self, height: usize) -> EncoderOptions {
        self.height = height;
        self
    }

    #[must_use]
    pub const fn colorspace(&self) -> ColorSpace {
        self.colorspace
    }

    #[must_use]
    pub fn set_colorspace(mut self, colorspace: ColorSpace) -> EncoderOptions {
        self.colorspace = colorspace;
        self
    }

    /// Sample precision in bits, `1..=16`.
    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }

    #[must_use]
    pub fn set_precision(mut self, precision: u8) -> EncoderOptions {
        self.precision = precision;
        self
    }

    /// Base layer quality, `1..=100`, scales the default quantizers.
    #[must_use]
    pub const fn quality(&self) -> u8 {
        self.quality
    }

    #[must_use]
    pub fn set_quality(mut self, quality: u8) -> EncoderOptions {
        self.quality = quality;
        self
    }

    /// Residual / extension layer quality, `0..=100`. `100` requests a
    /// lossless residual.
    #[must_use]
    pub const fn hdr_quality(&self) -> u8 {
        self.hdr_quality
    }

    #[must_use]
    pub fn set_hdr_quality(mut self, quality: u8) -> EncoderOptions {
        self.hdr_quality = quality;
        self
    }

    #[must_use]
    pub const fn frame_kind(&self) -> FrameKind {
        self.frame_kind
    }

    #[must_use]
    pub fn set_frame_kind(mut self, kind: FrameKind) -> EncoderOptions {
        self.frame_kind = kind;
        self
    }

    #[must_use]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    #[must_use]
    pub fn set_flags(mut self, flags: FrameFlags) -> EncoderOptions {
        self.flags = flags;
        self
    }

    /// Restart interval in MCUs, `0` disables restart markers.
    #[must_use]
    pub const fn restart_interval(&self) -> usize {
        self.restart_interval
    }

    #[must_use]
    pub fn set_restart_interval(mut self, interval: usize) -> EncoderOptions {
        self.restart_interval = interval;
        self
    }

    /// Per component `(h, v)` sampling factors. Empty means 1x1 for every
    /// component.
    #[must_use]
    pub fn subsampling(&self) -> &[(u8, u8)] {
        &self.subsampling
    }

    #[must_use]
    pub fn set_subsampling(mut self, subsampling: Vec<(u8, u8)>) -> EncoderOptions {
        self.subsampling = subsampling;
        self
    }

    /// Extra fractional coefficient bits carried in refinement scans,
    /// `0..=4`.
    #[must_use]
    pub const fn hidden_dct_bits(&self) -> u8 {
        self.hidden_dct_bits
    }

    #[must_use]
    pub fn set_hidden_dct_bits(mut self, bits: u8) -> EncoderOptions {
        self.hidden_dct_bits = bits;
        self
    }

    /// Right shift applied to samples before predictive coding.
    #[must_use]
    pub const fn point_transform(&self) -> u8 {
        self.point_transform
    }

    #[must_use]
    pub fn set_point_transform(mut self, pt: u8) -> EncoderOptions {
        self.point_transform = pt;
        self
    }

    /// Explicit progressive scan script. Empty selects the default script.
    #[must_use]
    pub fn scans(&self) -> &[ScanSpec] {
        &self.scans
    }

    #[must_use]
    pub fn set_scans(mut self, scans: Vec<ScanSpec>) -> EncoderOptions {
        self.scans = scans;
        self
    }

    #[must_use]
    pub const fn color_transform(&self) -> &ColorTransformKind {
        &self.color_transform
    }

    #[must_use]
    pub fn set_color_transform(mut self, kind: ColorTransformKind) -> EncoderOptions {
        self.color_transform = kind;
        self
    }

    /// Maximum per-sample reconstruction error for near-lossless coding.
    #[must_use]
    pub const fn error_bound(&self) -> u16 {
        self.error_bound
    }

    #[must_use]
    pub fn set_error_bound(mut self, bound: u16) -> EncoderOptions {
        self.error_bound = bound;
        self
    }

    /// Declare the height through a DNL marker after the first scan instead
    /// of in the frame header.
    #[must_use]
    pub const fn write_dnl(&self) -> bool {
        self.write_dnl
    }

    #[must_use]
    pub fn set_write_dnl(mut self, write_dnl: bool) -> EncoderOptions {
        self.write_dnl = write_dnl;
        self
    }

    #[must_use]
    pub const fn tone_map(&self) -> Option<ToneMapSpec> {
        self.tone_map
    }

    #[must_use]
    pub fn set_tone_map(mut self, tone_map: Option<ToneMapSpec>) -> EncoderOptions {
        self.tone_map = tone_map;
        self
    }

    /// Custom quantization tables in natural order, one per table slot
    /// (luma first, then chroma). Empty selects the default tables scaled
    /// by [`Self::quality`].
    #[must_use]
    pub fn quant_tables(&self) -> &[[u16; 64]] {
        &self.quant_tables
    }

    #[must_use]
    pub fn set_quant_tables(mut self, tables: Vec<[u16; 64]>) -> EncoderOptions {
        self.quant_tables = tables;
        self
    }

    /// Quantize AC bands with an enlarged zero bin (3/8 of a step on each
    /// side), trading a little energy for shorter runs. Off by default;
    /// the lossy residual layer switches it on for its own codestream.
    #[must_use]
    pub const fn dead_zone(&self) -> bool {
        self.dead_zone
    }

    #[must_use]
    pub fn set_dead_zone(mut self, dead_zone: bool) -> EncoderOptions {
        self.dead_zone = dead_zone;
        self
    }
}
