use crate::colorspace::ColorSpace;

/// How far a single call to the decoder's cooperative step function should
/// run before handing control back to the caller.
///
/// Whatever the granularity, the decoded output is identical; only the
/// number of calls needed changes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopPoint {
    /// Stop once the image header (everything up to the first scan) is in.
    ImageHeader,
    /// Stop after each decoded scan.
    Scan,
    /// Stop after each completed frame.
    Frame,
    /// Run to end of image.
    Image
}

/// Options that influence decoding.
#[derive(Copy, Clone, Debug)]
pub struct DecoderOptions {
    out_colorspace: ColorSpace,
    max_width:      usize,
    max_height:     usize,
    /// Maximum number of scans to allow in the image
    max_scans:      usize,
    /// Treat warnings as errors.
    strict_mode:    bool,
    stop_at:        StopPoint
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            out_colorspace: ColorSpace::RGB,
            max_width:      1 << 15,
            max_height:     1 << 15,
            max_scans:      256,
            strict_mode:    false,
            stop_at:        StopPoint::Image
        }
    }
}

impl DecoderOptions {
    #[must_use]
    pub fn new() -> DecoderOptions {
        Self::default()
    }

    /// Colorspace the pixels will be in after a successful decode.
    #[must_use]
    pub const fn out_colorspace(&self) -> ColorSpace {
        self.out_colorspace
    }

    #[must_use]
    pub const fn set_out_colorspace(mut self, colorspace: ColorSpace) -> DecoderOptions {
        self.out_colorspace = colorspace;
        self
    }

    /// Maximum width the decoder will accept, default `32768`.
    ///
    /// Prevents over-allocation on corrupt headers.
    #[must_use]
    pub const fn max_width(&self) -> usize {
        self.max_width
    }

    #[must_use]
    pub const fn set_max_width(mut self, max_width: usize) -> DecoderOptions {
        self.max_width = max_width;
        self
    }

    /// Maximum height the decoder will accept, default `32768`.
    #[must_use]
    pub const fn max_height(&self) -> usize {
        self.max_height
    }

    #[must_use]
    pub const fn set_max_height(mut self, max_height: usize) -> DecoderOptions {
        self.max_height = max_height;
        self
    }

    /// Maximum number of scans allowed per image, default `256`.
    ///
    /// Guards against images that keep appending refinement scans forever.
    #[must_use]
    pub const fn max_scans(&self) -> usize {
        self.max_scans
    }

    #[must_use]
    pub const fn set_max_scans(mut self, scans: usize) -> DecoderOptions {
        self.max_scans = scans;
        self
    }

    /// Whether warnings are treated as hard errors.
    #[must_use]
    pub const fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    #[must_use]
    pub const fn set_strict_mode(mut self, choice: bool) -> DecoderOptions {
        self.strict_mode = choice;
        self
    }

    /// The cooperative stop granularity honored by the step interface.
    #[must_use]
    pub const fn stop_at(&self) -> StopPoint {
        self.stop_at
    }

    #[must_use]
    pub const fn set_stop_at(mut self, stop_at: StopPoint) -> DecoderOptions {
        self.stop_at = stop_at;
        self
    }
}
