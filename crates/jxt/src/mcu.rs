//! The scan executor for DCT frames.
//!
//! One walk serves every DCT scan type: sequential and progressive,
//! Huffman and arithmetic coded, interleaved and single component. Blocks
//! land in per-component coefficient planes (contiguous 64-coefficient
//! blocks in raster order) so later scans, hidden refinement passes and
//! the optimizer can revisit them.

use jxt_core::bytestream::XtReaderTrait;
use jxt_core::log::{error, trace, warn};

use crate::arith::{self, AcContexts, ArithDecoder, DcContexts};
use crate::bitstream::BitStream;
use crate::components::Component;
use crate::decoder::JxtDecoder;
use crate::errors::DecodeErrors;
use crate::marker::Marker;
use crate::misc::MAX_COMPONENTS;

/// What kind of work the current scan does per block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ScanKind {
    Sequential,
    DcFirst,
    DcRefine,
    AcFirst,
    AcRefine
}

impl ScanKind {
    fn classify(progressive: bool, ss: u8, ah: u8) -> ScanKind {
        if !progressive {
            return ScanKind::Sequential;
        }
        match (ss == 0, ah == 0) {
            (true, true) => ScanKind::DcFirst,
            (true, false) => ScanKind::DcRefine,
            (false, true) => ScanKind::AcFirst,
            (false, false) => ScanKind::AcRefine
        }
    }
}

/// The entropy decoding state of one scan.
pub(crate) enum Entropy {
    Huffman(BitStream),
    Arithmetic {
        coder:     ArithDecoder,
        dc:        [Option<DcContexts>; MAX_COMPONENTS],
        ac:        [Option<AcContexts>; MAX_COMPONENTS],
        /// Previous DC difference per component, the conditioning state.
        prev_diff: [i32; MAX_COMPONENTS]
    },
}

impl Entropy {
    fn marker(&self) -> Option<Marker> {
        match self {
            Entropy::Huffman(stream) => stream.marker,
            Entropy::Arithmetic { coder, .. } => coder.marker
        }
    }

    fn restart(&mut self) {
        match self {
            Entropy::Huffman(stream) => stream.reset(),
            Entropy::Arithmetic {
                coder, prev_diff, ..
            } => {
                coder.reset();
                *prev_diff = [0; MAX_COMPONENTS];
                // statistics continue across restarts in this profile; the
                // coder registers alone are re-primed
            }
        }
    }
}

/// Decode the current scan of a DCT frame into the coefficient planes.
pub(crate) fn decode_scan<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let progressive = decoder.info.sof.is_progressive();
    let kind = ScanKind::classify(progressive, decoder.spec_start, decoder.succ_high);
    let arithmetic = decoder.info.sof.is_arithmetic();

    check_tables(decoder, kind, arithmetic)?;

    let mut entropy = if arithmetic {
        let mut dc: [Option<DcContexts>; MAX_COMPONENTS] = [None, None, None, None];
        let mut ac: [Option<AcContexts>; MAX_COMPONENTS] = [None, None, None, None];
        for &index in &decoder.z_order[..decoder.scan_components] {
            let component = &decoder.components[index];
            let (l, u) = decoder.dc_conditioning[component.dc_table_slot];
            dc[index] = Some(DcContexts::new(l, u));
            ac[index] = Some(AcContexts::new(
                decoder.ac_conditioning[component.ac_table_slot]
            ));
        }
        Entropy::Arithmetic {
            coder: ArithDecoder::new(),
            dc,
            ac,
            prev_diff: [0; MAX_COMPONENTS]
        }
    } else {
        let mut stream = BitStream::new();
        stream.set_scan_params(
            decoder.spec_start,
            decoder.spec_end,
            decoder.succ_high,
            decoder.succ_low
        );
        Entropy::Huffman(stream)
    };

    decoder.reset_predictors();
    decoder.todo = if decoder.restart_interval == 0 {
        usize::MAX
    } else {
        decoder.restart_interval
    };

    let grow_by_dnl = decoder.info.height == 0;
    if grow_by_dnl && (progressive || kind != ScanKind::Sequential) {
        return Err(DecodeErrors::NotInProfile(
            "height deferred to DNL outside a sequential frame"
        ));
    }

    let mut restart_count = 0_usize;

    // borrow split: the planes move out while the stream and tables stay
    let mut components = core::mem::take(&mut decoder.components);

    let outcome = if decoder.scan_components > 1 || grow_by_dnl {
        // the DNL path always walks the MCU grid so rows can grow as the
        // data arrives
        decode_interleaved(
            decoder,
            &mut components,
            &mut entropy,
            kind,
            grow_by_dnl,
            &mut restart_count
        )
    } else {
        decode_single_component(decoder, &mut components, &mut entropy, kind, &mut restart_count)
    };

    decoder.components = components;
    outcome?;

    // hand the terminating marker to the frame driver
    if decoder.pending_marker.is_none() {
        decoder.pending_marker = sync_to_marker(decoder, &mut entropy)?;
    }
    Ok(())
}

/// Confirm the tables a scan needs were defined.
fn check_tables<T: XtReaderTrait>(
    decoder: &JxtDecoder<T>, kind: ScanKind, arithmetic: bool
) -> Result<(), DecodeErrors> {
    if arithmetic {
        // conditioning has usable defaults, nothing to check
        return Ok(());
    }
    for &index in &decoder.z_order[..decoder.scan_components] {
        let component = &decoder.components[index];

        let needs_dc = matches!(kind, ScanKind::Sequential | ScanKind::DcFirst);
        let needs_ac = matches!(
            kind,
            ScanKind::Sequential | ScanKind::AcFirst | ScanKind::AcRefine
        );

        if needs_dc && decoder.dc_tables[component.dc_table_slot].is_none() {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "no DC table in slot {} for component {:?}",
                component.dc_table_slot, component.component_id
            )));
        }
        if needs_ac && decoder.ac_tables[component.ac_table_slot].is_none() {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "no AC table in slot {} for component {:?}",
                component.ac_table_slot, component.component_id
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn decode_interleaved<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, components: &mut [Component], entropy: &mut Entropy,
    kind: ScanKind, grow_by_dnl: bool, restart_count: &mut usize
) -> Result<(), DecodeErrors> {
    let mcu_x = decoder.mcu_x;
    let z_order = decoder.z_order;
    let scan_components = decoder.scan_components;
    let mut mcu_row = 0_usize;

    loop {
        if grow_by_dnl {
            decoder.grow_planes_one_mcu_row_of(components)?;
        } else if mcu_row >= decoder.mcu_y {
            break;
        }

        for mcu_col in 0..mcu_x {
            for &index in &z_order[..scan_components] {
                let component = &mut components[index];
                for v in 0..component.vertical_sample {
                    for h in 0..component.horizontal_sample {
                        let block_y = mcu_row * component.vertical_sample + v;
                        let block_x = mcu_col * component.horizontal_sample + h;

                        decode_one_block(
                            decoder, component, index, entropy, kind, block_x, block_y
                        )?;
                    }
                }
            }

            if !handle_mcu_boundary(decoder, components, entropy, restart_count)? {
                // premature end of data, leave the rest zero
                return Ok(());
            }
        }

        mcu_row += 1;

        if grow_by_dnl {
            // a non-restart marker ends the variable-height scan
            if let Some(marker) = entropy.marker() {
                if !matches!(marker, Marker::RST(_)) {
                    trace!("variable height scan ended by {marker:?} after {mcu_row} rows");
                    break;
                }
            } else if decoder.stream.eof().unwrap_or(true) {
                // the transport dried up before any marker arrived
                return Err(DecodeErrors::UnexpectedEof);
            }
        }
    }
    Ok(())
}

fn decode_single_component<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, components: &mut [Component], entropy: &mut Entropy,
    kind: ScanKind, restart_count: &mut usize
) -> Result<(), DecodeErrors> {
    let index = decoder.z_order[0];
    let (blocks_w, blocks_h) = {
        let component = &components[index];
        (
            component.width.div_ceil(8),
            component.height.div_ceil(8)
        )
    };

    for block_y in 0..blocks_h {
        for block_x in 0..blocks_w {
            let component = &mut components[index];
            decode_one_block(decoder, component, index, entropy, kind, block_x, block_y)?;

            if !handle_mcu_boundary(decoder, components, entropy, restart_count)? {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Decode a single block at `(block_x, block_y)` of one component.
fn decode_one_block<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, component: &mut Component, index: usize, entropy: &mut Entropy,
    kind: ScanKind, block_x: usize, block_y: usize
) -> Result<(), DecodeErrors> {
    let blocks_per_row = component.width_stride / 8;
    let offset = (block_y * blocks_per_row + block_x) * 64;

    let block: &mut [i32; 64] = components_block(&mut component.coeffs, offset)?;

    match entropy {
        Entropy::Huffman(stream) => {
            let dc_table = decoder.dc_tables[component.dc_table_slot].as_ref();
            let ac_table = decoder.ac_tables[component.ac_table_slot].as_ref();

            match kind {
                ScanKind::Sequential => {
                    block.fill(0);
                    stream.decode_block(
                        &mut decoder.stream,
                        required(dc_table)?,
                        required(ac_table)?,
                        block,
                        &mut component.dc_pred
                    )?;
                }
                ScanKind::DcFirst => {
                    stream.decode_dc_first(
                        &mut decoder.stream,
                        required(dc_table)?,
                        block,
                        &mut component.dc_pred
                    )?;
                }
                ScanKind::DcRefine => {
                    stream.decode_dc_refine(&mut decoder.stream, block)?;
                }
                ScanKind::AcFirst => {
                    stream.decode_ac_first(&mut decoder.stream, required(ac_table)?, block)?;
                }
                ScanKind::AcRefine => {
                    stream.decode_ac_refine(&mut decoder.stream, required(ac_table)?, block)?;
                }
            }
        }
        Entropy::Arithmetic {
            coder,
            dc,
            ac,
            prev_diff
        } => {
            let ss = usize::from(decoder.spec_start);
            let se = usize::from(decoder.spec_end);
            let al = decoder.succ_low;

            match kind {
                ScanKind::Sequential => {
                    block.fill(0);
                    let contexts = dc[index].as_mut().ok_or(DecodeErrors::MalformedStreamStatic(
                        "missing DC conditioning"
                    ))?;
                    let diff =
                        arith::decode_dc_diff(coder, &mut decoder.stream, contexts, prev_diff[index])?;
                    prev_diff[index] = diff;
                    component.dc_pred = component.dc_pred.wrapping_add(diff);
                    block[0] = component.dc_pred;

                    let contexts = ac[index].as_mut().ok_or(DecodeErrors::MalformedStreamStatic(
                        "missing AC conditioning"
                    ))?;
                    arith::decode_ac_band(coder, &mut decoder.stream, contexts, block, 1, 63, 0)?;
                }
                ScanKind::DcFirst => {
                    let contexts = dc[index].as_mut().ok_or(DecodeErrors::MalformedStreamStatic(
                        "missing DC conditioning"
                    ))?;
                    let diff =
                        arith::decode_dc_diff(coder, &mut decoder.stream, contexts, prev_diff[index])?;
                    prev_diff[index] = diff;
                    component.dc_pred = component.dc_pred.wrapping_add(diff);
                    block[0] = component.dc_pred << al;
                }
                ScanKind::DcRefine => {
                    if coder.decode_fixed(&mut decoder.stream) == 1 {
                        block[0] |= 1 << al;
                    }
                }
                ScanKind::AcFirst => {
                    let contexts = ac[index].as_mut().ok_or(DecodeErrors::MalformedStreamStatic(
                        "missing AC conditioning"
                    ))?;
                    arith::decode_ac_band(coder, &mut decoder.stream, contexts, block, ss, se, al)?;
                }
                ScanKind::AcRefine => {
                    arith::decode_ac_refine_band(
                        coder,
                        &mut decoder.stream,
                        ac[index].as_mut().ok_or(DecodeErrors::MalformedStreamStatic(
                            "missing AC conditioning"
                        ))?,
                        block,
                        ss,
                        se,
                        al
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn required<V>(table: Option<V>) -> Result<V, DecodeErrors> {
    table.ok_or(DecodeErrors::MalformedStreamStatic("entropy table missing"))
}

fn components_block(coeffs: &mut [i32], offset: usize) -> Result<&mut [i32; 64], DecodeErrors> {
    coeffs
        .get_mut(offset..offset + 64)
        .and_then(|s| s.try_into().ok())
        .ok_or(DecodeErrors::MalformedStreamStatic(
            "block outside the coefficient plane"
        ))
}

/// Restart bookkeeping after one MCU. Returns false when the scan data
/// ended prematurely and decoding should stop.
fn handle_mcu_boundary<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, components: &mut [Component], entropy: &mut Entropy,
    restart_count: &mut usize
) -> Result<bool, DecodeErrors> {
    decoder.todo = decoder.todo.saturating_sub(1);

    if decoder.todo == 0 && decoder.restart_interval > 0 {
        // a restart marker is due here
        let marker = sync_to_marker(decoder, entropy)?;
        match marker {
            Some(Marker::RST(m)) => {
                let expected = (*restart_count % 8) as u8;
                if m != expected {
                    if decoder.options.strict_mode() {
                        return Err(DecodeErrors::MalformedStream(format!(
                            "restart marker RST{m} where RST{expected} was due"
                        )));
                    }
                    warn!("restart marker RST{m} where RST{expected} was due, resyncing");
                }
                *restart_count += 1;
                decoder.todo = decoder.restart_interval;
                entropy.restart();
                for component in components.iter_mut() {
                    component.dc_pred = 0;
                }

                if let Entropy::Huffman(stream) = entropy {
                    stream.set_scan_params(
                        decoder.spec_start,
                        decoder.spec_end,
                        decoder.succ_high,
                        decoder.succ_low
                    );
                }
            }
            Some(other) => {
                // scan ended early; let the frame driver see the marker
                decoder.pending_marker = Some(other);
                return Ok(false);
            }
            None => {
                return Err(DecodeErrors::UnexpectedEof);
            }
        }
        return Ok(true);
    }

    // outside restart boundaries a marker means the data ran out
    if let Some(marker) = entropy.marker() {
        if !matches!(marker, Marker::RST(_)) {
            // the arithmetic coder looks ahead and legitimately touches
            // the trailing marker while the last blocks still decode, so
            // only the bit level reader can call a premature end
            let premature = match entropy {
                Entropy::Huffman(stream) => stream.saw_premature_end(),
                Entropy::Arithmetic { .. } => false
            };
            if premature {
                if decoder.options.strict_mode() {
                    return Err(DecodeErrors::MalformedStreamStatic(
                        "entropy coded data ended inside a scan"
                    ));
                }
                error!("entropy coded data ended inside a scan, zero filling");
                decoder.pending_marker = Some(marker);
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Drive the entropy source forward until the marker that ends the
/// current interval is known.
fn sync_to_marker<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, entropy: &mut Entropy
) -> Result<Option<Marker>, DecodeErrors> {
    match entropy {
        Entropy::Huffman(stream) => {
            stream.sync_to_marker(&mut decoder.stream);
            Ok(stream.marker.take())
        }
        Entropy::Arithmetic { coder, .. } => {
            coder.sync_to_marker(&mut decoder.stream);
            Ok(coder.marker.take())
        }
    }
}

impl<T: XtReaderTrait> JxtDecoder<T> {
    /// Variant of the plane growth helper that works on detached
    /// components during a scan.
    pub(crate) fn grow_planes_one_mcu_row_of(
        &mut self, components: &mut [Component]
    ) -> Result<(), DecodeErrors> {
        for component in components.iter_mut() {
            let extra = component.width_stride * component.vertical_sample * 8;
            component
                .coeffs
                .try_reserve(extra)
                .map_err(|_| DecodeErrors::OutOfMemory(extra * 4))?;
            component.coeffs.extend(core::iter::repeat(0).take(extra));
        }
        self.mcu_y += 1;
        for component in components.iter_mut() {
            component.height_stride = self.mcu_y * component.vertical_sample * 8;
        }
        Ok(())
    }
}
