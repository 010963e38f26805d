//! Marker segment parsers.
//!
//! Every parser accounts for the declared segment length exactly; a
//! mismatch between the length field and the bytes a segment actually
//! needs is a malformed stream.

use jxt_core::bytestream::XtReaderTrait;
use jxt_core::colorspace::ColorSpace;
use jxt_core::log::{trace, warn};

use crate::components::Component;
use crate::decoder::JxtDecoder;
use crate::errors::DecodeErrors;
use crate::huffman::HuffmanTable;
use crate::marker::Marker;
use crate::misc::{SofMarker, UN_ZIGZAG, MAX_COMPONENTS};

/// **B.2.4.2** Huffman table specification.
pub(crate) fn parse_huffman<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let mut length =
        i32::from(decoder.stream.get_u16_be_err()?.checked_sub(2).ok_or(
            DecodeErrors::MalformedStreamStatic("invalid DHT length")
        )?);

    while length > 16 {
        let info = decoder.stream.read_u8_err()?;
        let is_ac = (info >> 4) & 0xf;
        let slot = usize::from(info & 0xf);

        if slot >= MAX_COMPONENTS {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "DHT slot {slot} out of range 0..=3"
            )));
        }
        if is_ac > 1 {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "invalid DHT class {is_ac}, should be 0 or 1"
            )));
        }

        let mut bits = [0_u8; 17];
        decoder.stream.read_exact_bytes(&mut bits[1..17])?;
        length -= 1 + 16;

        let symbol_count: i32 = bits.iter().map(|&count| i32::from(count)).sum();
        if symbol_count > 256 {
            return Err(DecodeErrors::InvalidHuffman(
                "more than 256 symbols in a DHT segment".to_string()
            ));
        }
        if symbol_count > length {
            return Err(DecodeErrors::InvalidHuffman(format!(
                "DHT declares {symbol_count} symbols with only {length} bytes left"
            )));
        }
        length -= symbol_count;

        let mut values = [0_u8; 256];
        decoder
            .stream
            .read_exact_bytes(&mut values[..symbol_count as usize])?;

        let is_progressive = decoder.info.sof.is_progressive();
        if is_ac == 0 {
            decoder.dc_tables[slot] =
                Some(HuffmanTable::new(&bits, values, true, is_progressive)?);
        } else {
            decoder.ac_tables[slot] =
                Some(HuffmanTable::new(&bits, values, false, is_progressive)?);
        }
        trace!("DHT class {is_ac} slot {slot}, {symbol_count} symbols");
    }

    if length != 0 {
        return Err(DecodeErrors::MalformedStreamStatic(
            "DHT length disagrees with its tables"
        ));
    }
    Ok(())
}

/// **B.2.4.1** Quantization table specification.
pub(crate) fn parse_dqt<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let mut length =
        decoder.stream.get_u16_be_err()?.checked_sub(2).ok_or(
            DecodeErrors::MalformedStreamStatic("invalid DQT length")
        )?;

    while length > 0 {
        let info = decoder.stream.read_u8_err()?;
        let precision = usize::from(info >> 4);
        let slot = usize::from(info & 0x0f);
        let table_bytes = 64 * (precision + 1);

        if slot >= MAX_COMPONENTS {
            return Err(DecodeErrors::DqtError(format!(
                "DQT slot {slot} out of range 0..=3"
            )));
        }
        if (table_bytes + 1) as u16 > length {
            return Err(DecodeErrors::DqtError(format!(
                "DQT needs {} bytes but only {length} remain",
                table_bytes + 1
            )));
        }

        let mut table = [0_u16; 64];
        match precision {
            0 => {
                let mut raw = [0_u8; 64];
                decoder.stream.read_exact_bytes(&mut raw)?;
                for (i, &q) in raw.iter().enumerate() {
                    table[UN_ZIGZAG[i]] = u16::from(q);
                }
            }
            1 => {
                for i in 0..64 {
                    table[UN_ZIGZAG[i]] = decoder.stream.get_u16_be_err()?;
                }
            }
            _ => {
                return Err(DecodeErrors::DqtError(format!(
                    "DQT precision flag {precision} should be 0 or 1"
                )));
            }
        }

        if table.iter().any(|&q| q == 0) {
            return Err(DecodeErrors::DqtError(
                "quantization step of zero".to_string()
            ));
        }
        if table.iter().any(|&q| q > 32767) {
            return Err(DecodeErrors::DqtError(
                "quantization step beyond 15 bits".to_string()
            ));
        }

        length -= (table_bytes + 1) as u16;
        trace!("DQT slot {slot}, {} bit entries", 8 * (precision + 1));
        decoder.qt_tables[slot] = Some(table);
    }

    Ok(())
}

/// **B.2.4.3** Arithmetic conditioning specification.
pub(crate) fn parse_dac<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let mut length =
        decoder.stream.get_u16_be_err()?.checked_sub(2).ok_or(
            DecodeErrors::MalformedStreamStatic("invalid DAC length")
        )?;

    while length >= 2 {
        let info = decoder.stream.read_u8_err()?;
        let value = decoder.stream.read_u8_err()?;
        length -= 2;

        let class = info >> 4;
        let slot = usize::from(info & 0x0f);
        if slot >= MAX_COMPONENTS {
            return Err(DecodeErrors::MalformedStream(format!(
                "DAC slot {slot} out of range 0..=3"
            )));
        }

        match class {
            0 => {
                // DC conditioning: L in the low nibble, U in the high one
                let l = value & 0x0f;
                let u = value >> 4;
                if u < l {
                    return Err(DecodeErrors::MalformedStreamStatic(
                        "DAC with U smaller than L"
                    ));
                }
                decoder.dc_conditioning[slot] = (l, u);
            }
            1 => {
                if !(1..=63).contains(&value) {
                    return Err(DecodeErrors::MalformedStream(format!(
                        "DAC Kx {value} out of range 1..=63"
                    )));
                }
                decoder.ac_conditioning[slot] = value;
            }
            _ => {
                return Err(DecodeErrors::MalformedStreamStatic(
                    "DAC class should be 0 or 1"
                ));
            }
        }
    }

    if length != 0 {
        return Err(DecodeErrors::MalformedStreamStatic(
            "DAC length disagrees with its entries"
        ));
    }
    Ok(())
}

/// **B.2.2** Frame header.
pub(crate) fn parse_sof<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, marker: Marker
) -> Result<(), DecodeErrors> {
    let Marker::SOF(index) = marker else {
        return Err(DecodeErrors::MalformedStreamStatic("not an SOF marker"));
    };

    if decoder.seen_sof {
        return Err(DecodeErrors::DoubleMarker(marker));
    }

    let Some(sof) = SofMarker::from_sof_index(index) else {
        // a reserved frame type in the skippable range; step over its
        // length-prefixed segment
        warn!("skipping reserved frame marker SOF{index}");
        return skip_segment(decoder);
    };
    if sof.is_differential() {
        return Err(DecodeErrors::NotInProfile(
            "differential frames need a hierarchical image"
        ));
    }

    let length = decoder.stream.get_u16_be_err()?;

    let precision = decoder.stream.read_u8_err()?;
    let max_precision = if sof.is_lossless() { 16 } else { 12 };
    if !(1..=max_precision).contains(&precision) {
        return Err(DecodeErrors::SofError(format!(
            "precision {precision} out of range for {sof:?}"
        )));
    }
    if sof == SofMarker::BaselineDct && precision != 8 {
        return Err(DecodeErrors::SofError(format!(
            "baseline frames are 8 bit, found {precision}"
        )));
    }

    let height = usize::from(decoder.stream.get_u16_be_err()?);
    let width = usize::from(decoder.stream.get_u16_be_err()?);
    let num_components = decoder.stream.read_u8_err()?;

    if num_components == 0 {
        return Err(DecodeErrors::SofError(
            "frame with zero components".to_string()
        ));
    }
    if usize::from(num_components) > MAX_COMPONENTS {
        return Err(DecodeErrors::NotInProfile("more than four components"));
    }

    let expected = 8 + 3 * u16::from(num_components);
    if length != expected {
        return Err(DecodeErrors::SofError(format!(
            "SOF length {length}, expected {expected}"
        )));
    }

    trace!("{sof:?}: {width}x{height}, {num_components} components, {precision} bits");

    decoder.info.width = width;
    decoder.info.height = height;
    decoder.info.precision = precision;
    decoder.info.components = num_components;
    decoder.info.sof = sof;

    let mut components = Vec::with_capacity(usize::from(num_components));
    for position in 0..num_components {
        let mut raw = [0_u8; 3];
        decoder.stream.read_exact_bytes(&mut raw)?;
        components.push(Component::from_sof_bytes(raw, position)?);
    }

    if sof.is_lossless() && components.iter().any(|c| c.horizontal_sample != 1 || c.vertical_sample != 1)
    {
        return Err(DecodeErrors::NotInProfile(
            "subsampled lossless frames are not supported"
        ));
    }

    decoder.components = components;
    decoder.seen_sof = true;

    // height zero is legal here, a DNL will deliver it after the first
    // scan; allocation happens lazily in that case
    if height != 0 {
        decoder.allocate_planes()?;
    } else if sof.is_progressive() || sof.is_lossless() {
        return Err(DecodeErrors::NotInProfile(
            "DNL delivered height outside a sequential DCT frame"
        ));
    } else {
        decoder.info.height = 0;
        decoder.mcu_y = 0;
        decoder.h_max = decoder
            .components
            .iter()
            .map(|c| c.horizontal_sample)
            .max()
            .unwrap_or(1);
        decoder.v_max = decoder
            .components
            .iter()
            .map(|c| c.vertical_sample)
            .max()
            .unwrap_or(1);
        decoder.mcu_x = width.div_ceil(8 * decoder.h_max);
        let (h_max, mcu_x) = (decoder.h_max, decoder.mcu_x);
        for component in &mut decoder.components {
            component.width = (width * component.horizontal_sample).div_ceil(h_max);
            component.width_stride = mcu_x * component.horizontal_sample * 8;
        }
    }

    Ok(())
}

/// **B.2.3** Scan header.
pub(crate) fn parse_sos<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    if !decoder.seen_sof {
        return Err(DecodeErrors::MalformedStreamStatic("SOS before SOF"));
    }

    let length = usize::from(decoder.stream.get_u16_be_err()?);
    let ns = decoder.stream.read_u8_err()?;

    if !(1..=4).contains(&ns) {
        return Err(DecodeErrors::SosError(format!(
            "scan with {ns} components, expected 1..=4"
        )));
    }
    if length != 6 + 2 * usize::from(ns) {
        return Err(DecodeErrors::SosError(format!("bad SOS length {length}")));
    }

    decoder.scan_components = usize::from(ns);

    let mut total_blocks = 0_usize;
    for i in 0..usize::from(ns) {
        let id = decoder.stream.read_u8_err()?;
        let tables = decoder.stream.read_u8_err()?;

        let position = decoder
            .components
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| {
                DecodeErrors::SosError(format!("scan references unknown component id {id}"))
            })?;

        if decoder.z_order[..i].contains(&position) {
            return Err(DecodeErrors::SosError(format!(
                "component id {id} appears twice in one scan"
            )));
        }

        let component = &mut decoder.components[position];
        component.dc_table_slot = usize::from(tables >> 4);
        component.ac_table_slot = usize::from(tables & 0x0f);
        if component.dc_table_slot >= MAX_COMPONENTS || component.ac_table_slot >= MAX_COMPONENTS {
            return Err(DecodeErrors::SosError(format!(
                "table slot out of range in scan component {id}"
            )));
        }

        total_blocks += component.horizontal_sample * component.vertical_sample;
        decoder.z_order[i] = position;
    }

    if usize::from(ns) > 1 && total_blocks > 10 {
        return Err(DecodeErrors::SosError(format!(
            "interleaved scan with {total_blocks} blocks per MCU, limit is 10"
        )));
    }

    decoder.spec_start = decoder.stream.read_u8_err()?;
    decoder.spec_end = decoder.stream.read_u8_err()?;
    let approx = decoder.stream.read_u8_err()?;
    decoder.succ_high = approx >> 4;
    decoder.succ_low = approx & 0x0f;

    validate_scan_params(decoder)?;

    trace!(
        "SOS: Ss={} Se={} Ah={} Al={}",
        decoder.spec_start,
        decoder.spec_end,
        decoder.succ_high,
        decoder.succ_low
    );
    Ok(())
}

fn validate_scan_params<T: XtReaderTrait>(decoder: &JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let (ss, se) = (decoder.spec_start, decoder.spec_end);
    let (ah, al) = (decoder.succ_high, decoder.succ_low);

    if decoder.info.sof.is_lossless() {
        // Ss selects the predictor, Al holds the point transform;
        // predictor zero belongs to differential frames only
        if !(1..=7).contains(&ss) || se != 0 || ah != 0 {
            return Err(DecodeErrors::SosError(format!(
                "bad lossless scan parameters Ss={ss} Se={se} Ah={ah}"
            )));
        }
        return Ok(());
    }

    if se > 63 || ss > 63 || se < ss {
        return Err(DecodeErrors::SosError(format!(
            "bad spectral band {ss}..={se}"
        )));
    }
    if ah > 13 || al > 13 {
        return Err(DecodeErrors::SosError(format!(
            "bad successive approximation Ah={ah} Al={al}"
        )));
    }

    if decoder.info.sof.is_progressive() {
        if ss == 0 && se != 0 {
            return Err(DecodeErrors::SosError(
                "progressive scans cannot mix DC and AC".to_string()
            ));
        }
        if ss > 0 && decoder.scan_components != 1 {
            return Err(DecodeErrors::SosError(
                "progressive AC scans carry a single component".to_string()
            ));
        }
        if ah != 0 && ah != al + 1 {
            return Err(DecodeErrors::SosError(format!(
                "refinement with Ah={ah}, Al={al}; Ah must be Al+1"
            )));
        }
    } else if ss != 0 || se != 63 || ah != 0 || al != 0 {
        return Err(DecodeErrors::SosError(
            "sequential scans must cover the full band".to_string()
        ));
    }

    Ok(())
}

/// **B.2.4.4** Restart interval definition.
pub(crate) fn parse_dri<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let length = decoder.stream.get_u16_be_err()?;
    if length != 4 {
        return Err(DecodeErrors::MalformedStreamStatic("DRI length must be 4"));
    }
    decoder.restart_interval = usize::from(decoder.stream.get_u16_be_err()?);
    trace!("restart interval {}", decoder.restart_interval);
    Ok(())
}

/// **B.2.5** Number-of-lines definition, delivered after the first scan.
pub(crate) fn parse_dnl<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let length = decoder.stream.get_u16_be_err()?;
    if length != 4 {
        return Err(DecodeErrors::MalformedStreamStatic("DNL length must be 4"));
    }
    let height = usize::from(decoder.stream.get_u16_be_err()?);
    if height == 0 {
        return Err(DecodeErrors::MalformedStreamStatic("DNL with zero height"));
    }

    let decoded_rows = decoder.mcu_y;
    let needed_rows = height.div_ceil(8 * decoder.v_max);

    // fewer lines than already decoded cannot be honored
    if needed_rows > decoded_rows || decoded_rows == 0 {
        return Err(DecodeErrors::MalformedStream(format!(
            "DNL declares {height} lines but {decoded_rows} MCU rows were decoded"
        )));
    }
    if needed_rows < decoded_rows {
        return Err(DecodeErrors::MalformedStream(format!(
            "DNL declares {height} lines, fewer than the {decoded_rows} MCU rows already decoded"
        )));
    }

    decoder.info.height = height;
    let v_max = decoder.v_max;
    for component in &mut decoder.components {
        component.height =
            (height * component.vertical_sample).div_ceil(v_max);
    }
    trace!("DNL set height to {height}");
    Ok(())
}

/// Skip or absorb a marker that is not SOF/SOS/EOI.
pub(crate) fn parse_misc_marker<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>, marker: Marker
) -> Result<(), DecodeErrors> {
    match marker {
        Marker::DHT => parse_huffman(decoder),
        Marker::DQT => parse_dqt(decoder),
        Marker::DAC => parse_dac(decoder),
        Marker::DRI => parse_dri(decoder),
        Marker::DNL => parse_dnl(decoder),
        Marker::SOI => Err(DecodeErrors::DoubleMarker(Marker::SOI)),
        Marker::DHP | Marker::EXP => Err(DecodeErrors::NotInProfile(
            "hierarchical images are not supported"
        )),
        Marker::APP(11) => crate::residual::parse_app11(decoder),
        Marker::APP(14) => parse_app14(decoder),
        Marker::APP(_) | Marker::COM | Marker::JPG(_) => skip_segment(decoder),
        Marker::TEM => Ok(()),
        Marker::RST(_) => Err(DecodeErrors::MalformedStreamStatic(
            "restart marker outside an entropy coded segment"
        )),
        Marker::SOF(_) | Marker::SOS | Marker::EOI => Err(DecodeErrors::MalformedStreamStatic(
            "frame structure marker where tables were expected"
        ))
    }
}

/// Skip a length-prefixed segment without looking inside.
pub(crate) fn skip_segment<T: XtReaderTrait>(
    decoder: &mut JxtDecoder<T>
) -> Result<(), DecodeErrors> {
    let length = decoder.stream.get_u16_be_err()?;
    if length < 2 {
        return Err(DecodeErrors::MalformedStreamStatic(
            "segment length smaller than its own field"
        ));
    }
    decoder.stream.skip(usize::from(length) - 2)?;
    Ok(())
}

/// Adobe APP14, carries the color transform byte.
fn parse_app14<T: XtReaderTrait>(decoder: &mut JxtDecoder<T>) -> Result<(), DecodeErrors> {
    let length = usize::from(decoder.stream.get_u16_be_err()?);
    if length < 2 {
        return Err(DecodeErrors::MalformedStreamStatic("APP14 too short"));
    }
    let mut remaining = length - 2;

    if remaining >= 12 && decoder.stream.peek_at(0, 5)? == *b"Adobe" {
        decoder.stream.skip(11)?;
        let transform = decoder.stream.read_u8_err()?;
        remaining -= 12;
        match transform {
            0 => decoder.xt.adobe_transform = Some(ColorSpace::RGB),
            1 => decoder.xt.adobe_transform = Some(ColorSpace::YCbCr),
            other => {
                warn!("unknown Adobe transform {other}, ignoring");
            }
        }
    }
    decoder.stream.skip(remaining)?;
    Ok(())
}
