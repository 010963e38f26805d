//! The decoder instance and its cooperative driver.

use jxt_core::bytestream::{XtCursor, XtReader, XtReaderTrait};
use jxt_core::log::{trace, warn};
use jxt_core::options::{DecoderOptions, StopPoint};

use crate::components::Component;
use crate::errors::DecodeErrors;
use crate::huffman::HuffmanTable;
use crate::marker::Marker;
use crate::misc::{SofMarker, MAX_COMPONENTS};
use crate::residual::XtSideData;

/// Upper bound on total samples per plane, an allocation guard.
pub(crate) const MAX_DIMENSIONS: usize = 1 << 27;

/// Basic information from the frame header.
#[derive(Copy, Clone, Debug, Default)]
pub struct ImageInfo {
    pub width:      usize,
    pub height:     usize,
    pub precision:  u8,
    pub components: u8,
    pub sof:        SofMarker
}

/// Decoded pixels in the format the stream dictates.
#[derive(Clone, Debug)]
pub enum Pixels {
    /// Precisions up to 8 bits.
    U8(Vec<u8>),
    /// Precisions 9 to 16 bits.
    U16(Vec<u16>),
    /// HDR streams with a float reconstruction.
    F32(Vec<f32>)
}

/// What a cooperative [`JxtDecoder::advance`] call completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeProgress {
    /// The image header (through the tables before the first scan) is in.
    ImageHeader,
    /// One entropy coded scan was decoded.
    Scan,
    /// The current frame is complete.
    Frame,
    /// The image is complete; pixels are ready.
    Done
}

/// Where the driver currently stands between calls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum DecodePhase {
    Start,
    InFrame,
    FrameDone,
    Done
}

/// A JPEG / JPEG XT decoder over a byte source.
pub struct JxtDecoder<T: XtReaderTrait> {
    pub(crate) stream:  XtReader<T>,
    pub(crate) options: DecoderOptions,
    pub(crate) info:    ImageInfo,

    /// Quantization table slots, natural order.
    pub(crate) qt_tables: [Option<[u16; 64]>; MAX_COMPONENTS],
    /// Huffman table slots.
    pub(crate) dc_tables: [Option<HuffmanTable>; MAX_COMPONENTS],
    pub(crate) ac_tables: [Option<HuffmanTable>; MAX_COMPONENTS],
    /// Arithmetic conditioning slots: DC `(L, U)`, AC `Kx`.
    pub(crate) dc_conditioning: [(u8, u8); MAX_COMPONENTS],
    pub(crate) ac_conditioning: [u8; MAX_COMPONENTS],

    pub(crate) components: Vec<Component>,

    pub(crate) h_max: usize,
    pub(crate) v_max: usize,
    /// MCUs per row / column for interleaved scans.
    pub(crate) mcu_x: usize,
    pub(crate) mcu_y: usize,

    pub(crate) restart_interval: usize,
    pub(crate) todo:             usize,

    // parameters of the scan being decoded
    pub(crate) spec_start:      u8,
    pub(crate) spec_end:        u8,
    pub(crate) succ_high:       u8,
    pub(crate) succ_low:        u8,
    pub(crate) scan_components: usize,
    pub(crate) z_order:         [usize; MAX_COMPONENTS],

    pub(crate) seen_sof:        bool,
    pub(crate) seen_eoi:        bool,
    pub(crate) scans_processed: usize,

    /// JPEG XT side data collected from APP11 boxes.
    pub(crate) xt: XtSideData,

    pub(crate) phase:  DecodePhase,
    /// Marker read ahead of its segment, waiting to be dispatched.
    pub(crate) pending_marker: Option<Marker>,
    pixels: Option<Pixels>
}

impl<T: XtReaderTrait> JxtDecoder<T> {
    pub fn new(source: T) -> JxtDecoder<T> {
        JxtDecoder::new_with_options(source, DecoderOptions::default())
    }

    pub fn new_with_options(source: T, options: DecoderOptions) -> JxtDecoder<T> {
        JxtDecoder {
            stream: XtReader::new(source),
            options,
            info: ImageInfo::default(),
            qt_tables: [None, None, None, None],
            dc_tables: [None, None, None, None],
            ac_tables: [None, None, None, None],
            dc_conditioning: [(0, 1); MAX_COMPONENTS],
            ac_conditioning: [5; MAX_COMPONENTS],
            components: vec![],
            h_max: 1,
            v_max: 1,
            mcu_x: 0,
            mcu_y: 0,
            restart_interval: 0,
            todo: usize::MAX,
            spec_start: 0,
            spec_end: 63,
            succ_high: 0,
            succ_low: 0,
            scan_components: 0,
            z_order: [0; MAX_COMPONENTS],
            seen_sof: false,
            seen_eoi: false,
            scans_processed: 0,
            xt: XtSideData::default(),
            phase: DecodePhase::Start,
            pending_marker: None,
            pixels: None
        }
    }

    /// Image information, available once the headers are in.
    #[must_use]
    pub fn info(&self) -> Option<ImageInfo> {
        if self.seen_sof {
            Some(self.info)
        } else {
            None
        }
    }

    /// Parse everything up to (but not into) the first scan.
    pub fn decode_headers(&mut self) -> Result<(), DecodeErrors> {
        if self.phase != DecodePhase::Start {
            return Ok(());
        }

        let soi = self.stream.get_u16_be_err()?;
        if soi != 0xffd8 {
            return Err(DecodeErrors::NoJpeg(soi));
        }

        loop {
            let marker = self.next_marker()?;
            match marker {
                Marker::SOF(_) => {
                    crate::headers::parse_sof(self, marker)?;
                }
                Marker::SOS => {
                    // scan data starts here; leave the marker pending
                    self.pending_marker = Some(Marker::SOS);
                    self.phase = DecodePhase::InFrame;
                    return Ok(());
                }
                Marker::EOI => {
                    return Err(DecodeErrors::MalformedStreamStatic(
                        "EOI before any scan data"
                    ));
                }
                other => {
                    crate::headers::parse_misc_marker(self, other)?;
                }
            }
        }
    }

    /// Find the next marker, tolerating fill bytes.
    pub(crate) fn next_marker(&mut self) -> Result<Marker, DecodeErrors> {
        if let Some(marker) = self.pending_marker.take() {
            return Ok(marker);
        }

        let mut byte = self.stream.read_u8_err()?;

        // a small amount of garbage between segments is tolerated outside
        // strict mode
        let mut skipped = 0_usize;
        while byte != 0xff {
            skipped += 1;
            if skipped > 512 || self.options.strict_mode() {
                return Err(DecodeErrors::MalformedStreamStatic(
                    "garbage between marker segments"
                ));
            }
            byte = self.stream.read_u8_err()?;
        }
        if skipped > 0 {
            warn!("skipped {skipped} garbage bytes before a marker");
        }

        let mut kind = self.stream.read_u8_err()?;
        while kind == 0xff {
            // legal fill bytes
            kind = self.stream.read_u8_err()?;
        }
        if kind == 0x00 {
            return Err(DecodeErrors::MalformedStreamStatic(
                "stuffed byte where a marker was expected"
            ));
        }

        Marker::from_u8(kind).ok_or(DecodeErrors::MalformedStreamStatic("reserved marker"))
    }

    /// Run one cooperative step, honoring the configured stop point.
    pub fn advance(&mut self) -> Result<DecodeProgress, DecodeErrors> {
        loop {
            let progress = self.advance_once()?;
            let stop = match (self.options.stop_at(), progress) {
                (_, DecodeProgress::Done) => true,
                (StopPoint::ImageHeader, _) => true,
                (StopPoint::Scan, DecodeProgress::Scan | DecodeProgress::Frame) => true,
                (StopPoint::Frame, DecodeProgress::Frame) => true,
                _ => false
            };
            if stop {
                return Ok(progress);
            }
        }
    }

    fn advance_once(&mut self) -> Result<DecodeProgress, DecodeErrors> {
        match self.phase {
            DecodePhase::Start => {
                self.decode_headers()?;
                Ok(DecodeProgress::ImageHeader)
            }
            DecodePhase::InFrame => {
                let frame_done = self.decode_one_scan()?;
                if frame_done {
                    self.phase = DecodePhase::FrameDone;
                    Ok(DecodeProgress::Frame)
                } else {
                    Ok(DecodeProgress::Scan)
                }
            }
            DecodePhase::FrameDone => {
                let pixels = self.finish_frame()?;
                self.pixels = Some(pixels);
                self.phase = DecodePhase::Done;
                Ok(DecodeProgress::Done)
            }
            DecodePhase::Done => Ok(DecodeProgress::Done)
        }
    }

    /// Decode the whole image.
    pub fn decode(&mut self) -> Result<Pixels, DecodeErrors> {
        loop {
            if self.advance()? == DecodeProgress::Done {
                break;
            }
        }
        self.pixels
            .take()
            .ok_or(DecodeErrors::MalformedStreamStatic("no pixels decoded"))
    }

    /// Decode one scan; returns true when the frame has no further scans.
    fn decode_one_scan(&mut self) -> Result<bool, DecodeErrors> {
        // dispatch markers until the scan header
        loop {
            let marker = match self.next_marker() {
                Ok(marker) => marker,
                Err(DecodeErrors::UnexpectedEof)
                    if !self.options.strict_mode() && self.scans_processed > 0 =>
                {
                    // truncated after at least one scan; salvage what we
                    // have as if EOI had arrived
                    warn!("stream ended without EOI, finishing with decoded data");
                    self.seen_eoi = true;
                    return Ok(true);
                }
                Err(err) => return Err(err)
            };
            match marker {
                Marker::SOS => {
                    crate::headers::parse_sos(self)?;
                    break;
                }
                Marker::EOI => {
                    self.seen_eoi = true;
                    return Ok(true);
                }
                Marker::SOF(_) => {
                    return Err(DecodeErrors::DoubleMarker(marker));
                }
                other => {
                    crate::headers::parse_misc_marker(self, other)?;
                }
            }
        }

        self.scans_processed += 1;
        if self.scans_processed > self.options.max_scans() {
            return Err(DecodeErrors::MalformedStream(format!(
                "too many scans, exceeded limit of {}",
                self.options.max_scans()
            )));
        }

        trace!(
            "scan {}: components {}, band {}..={}, Ah {}, Al {}",
            self.scans_processed,
            self.scan_components,
            self.spec_start,
            self.spec_end,
            self.succ_high,
            self.succ_low
        );

        if self.info.sof.is_lossless() {
            crate::lossless::decode_scan(self)?;
        } else {
            crate::mcu::decode_scan(self)?;
        }

        // the marker that ended the scan decides whether the frame goes on
        match self.pending_marker {
            Some(Marker::EOI) => {
                self.pending_marker = None;
                self.seen_eoi = true;
                Ok(true)
            }
            Some(Marker::DNL) => {
                self.pending_marker = None;
                crate::headers::parse_dnl(self)?;
                Ok(false)
            }
            _ => Ok(false)
        }
    }

    /// IDCT, upsample, color convert and merge the XT layers into the
    /// final raster.
    fn finish_frame(&mut self) -> Result<Pixels, DecodeErrors> {
        if !self.info.sof.is_lossless() {
            crate::worker::apply_hidden_refinement(self)?;
            crate::worker::dequantize_and_idct(self)?;
        }
        crate::worker::finish_pixels(self)
    }

    /// Reset per-component DC predictors, used at scan starts and restart
    /// markers.
    pub(crate) fn reset_predictors(&mut self) {
        for component in &mut self.components {
            component.dc_pred = 0;
        }
    }

    /// Allocate the coefficient and sample planes once dimensions are
    /// known.
    pub(crate) fn allocate_planes(&mut self) -> Result<(), DecodeErrors> {
        let width = self.info.width;
        let height = self.info.height;

        if width == 0 {
            return Err(DecodeErrors::SofError("image width is zero".to_string()));
        }
        if width > self.options.max_width() || height > self.options.max_height() {
            return Err(DecodeErrors::MalformedStream(format!(
                "dimensions {width}x{height} beyond configured limits"
            )));
        }
        if width.saturating_mul(height.max(1)) > MAX_DIMENSIONS {
            return Err(DecodeErrors::MalformedStreamStatic("image too large"));
        }

        self.h_max = self.components.iter().map(|c| c.horizontal_sample).max().unwrap_or(1);
        self.v_max = self.components.iter().map(|c| c.vertical_sample).max().unwrap_or(1);

        self.mcu_x = width.div_ceil(8 * self.h_max);
        self.mcu_y = height.div_ceil(8 * self.v_max);

        let (h_max, v_max, mcu_x, mcu_y) = (self.h_max, self.v_max, self.mcu_x, self.mcu_y);
        let lossless = self.info.sof.is_lossless();

        for component in &mut self.components {
            component.width = (width * component.horizontal_sample).div_ceil(h_max);
            component.height = (height * component.vertical_sample).div_ceil(v_max);
            component.width_stride = mcu_x * component.horizontal_sample * 8;
            component.height_stride = mcu_y * component.vertical_sample * 8;

            if lossless {
                component.width_stride = component.width;
                component.height_stride = component.height;
            }

            let samples = component.width_stride * component.height_stride.max(1);

            if lossless {
                component.samples = try_alloc_u16(samples)?;
            } else {
                // one i32 coefficient per sample position
                component.coeffs = try_alloc_i32(samples)?;
            }
        }
        Ok(())
    }

}

impl JxtDecoder<XtCursor<Vec<u8>>> {
    /// Convenience constructor over an owned byte vector.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        JxtDecoder::new(XtCursor::new(data))
    }
}

pub(crate) fn try_alloc_u16(len: usize) -> Result<Vec<u16>, DecodeErrors> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DecodeErrors::OutOfMemory(len * 2))?;
    v.resize(len, 0);
    Ok(v)
}

pub(crate) fn try_alloc_i32(len: usize) -> Result<Vec<i32>, DecodeErrors> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DecodeErrors::OutOfMemory(len * 4))?;
    v.resize(len, 0);
    Ok(v)
}
