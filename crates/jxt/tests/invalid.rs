//! Corrupt and malformed stream behavior.

use jxt::errors::DecodeErrors;
use jxt::{ColorSpace, DecoderOptions, JxtDecoder, JxtEncoder, EncoderOptions, Pixels};
use jxt_core::bytestream::XtCursor;

#[test]
fn missing_soi_is_not_a_jpeg() {
    let mut decoder = JxtDecoder::new(XtCursor::new([0x89, 0x50, 0x4e, 0x47]));
    match decoder.decode() {
        Err(DecodeErrors::NoJpeg(bytes)) => assert_eq!(bytes, 0x8950),
        other => panic!("expected NoJpeg, got {other:?}")
    }
}

#[test]
fn empty_stream_is_an_eof() {
    let mut decoder = JxtDecoder::new(XtCursor::new([]));
    assert!(matches!(
        decoder.decode(),
        Err(DecodeErrors::UnexpectedEof)
    ));
}

#[test]
fn truncated_after_soi() {
    let mut decoder = JxtDecoder::new(XtCursor::new([0xff, 0xd8, 0xff]));
    assert!(decoder.decode().is_err());
}

#[test]
fn double_soi_is_rejected() {
    let mut decoder = JxtDecoder::new(XtCursor::new([0xff, 0xd8, 0xff, 0xd8]));
    assert!(matches!(
        decoder.decode(),
        Err(DecodeErrors::DoubleMarker(_))
    ));
}

#[test]
fn eoi_before_any_scan_is_malformed() {
    let mut decoder = JxtDecoder::new(XtCursor::new([0xff, 0xd8, 0xff, 0xd9]));
    assert!(matches!(
        decoder.decode(),
        Err(DecodeErrors::MalformedStreamStatic(_))
    ));
}

#[test]
fn huffman_length_underflow() {
    // DHT with a length smaller than its own length field
    let mut decoder = JxtDecoder::new(XtCursor::new([0xff, 0xd8, 0xff, 0xc4, 0x00, 0x00]));
    assert!(decoder.decode().is_err());
}

#[test]
fn dht_with_excess_symbols() {
    // a BITS array summing over 256
    let mut data = vec![0xff, 0xd8, 0xff, 0xc4, 0x01, 0x30, 0x00];
    data.extend_from_slice(&[255_u8; 16]);
    data.extend_from_slice(&[0_u8; 0x130 - 2 - 1 - 16]);

    let mut decoder = JxtDecoder::new(XtCursor::new(data));
    assert!(matches!(
        decoder.decode(),
        Err(DecodeErrors::InvalidHuffman(_))
    ));
}

#[test]
fn dqt_with_zero_step_is_rejected() {
    let mut data = vec![0xff, 0xd8, 0xff, 0xdb, 0x00, 0x43, 0x00];
    data.extend_from_slice(&[0_u8; 64]);

    let mut decoder = JxtDecoder::new(XtCursor::new(data));
    assert!(matches!(decoder.decode(), Err(DecodeErrors::DqtError(_))));
}

#[test]
fn sos_before_sof_is_malformed() {
    let mut decoder = JxtDecoder::new(XtCursor::new([
        0xff, 0xd8, 0xff, 0xda, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3f, 0x00
    ]));
    assert!(decoder.decode().is_err());
}

#[test]
fn hierarchical_streams_are_out_of_profile() {
    // a DHP segment uses the SOF layout
    let data = vec![
        0xff, 0xd8, 0xff, 0xde, 0x00, 0x0b, 0x08, 0x00, 0x10, 0x00, 0x10, 0x01, 0x01, 0x11, 0x00
    ];
    let mut decoder = JxtDecoder::new(XtCursor::new(data));
    assert!(matches!(
        decoder.decode(),
        Err(DecodeErrors::NotInProfile(_))
    ));
}

#[test]
fn oversized_dimensions_hit_the_limits() {
    let source = vec![128_u8; 64 * 64];
    let stream = JxtEncoder::new(
        &source,
        EncoderOptions::new(64, 64, ColorSpace::Luma, 8)
    )
    .encode_to_vec()
    .unwrap();

    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(stream),
        DecoderOptions::new().set_max_width(32)
    );
    assert!(decoder.decode().is_err());
}

#[test]
fn garbage_tail_inside_scan_recovers_in_lenient_mode() {
    let source = vec![200_u8; 32 * 32];
    let mut stream = JxtEncoder::new(
        &source,
        EncoderOptions::new(32, 32, ColorSpace::Luma, 8)
    )
    .encode_to_vec()
    .unwrap();

    // chop off the tail of the entropy coded data (and EOI)
    let keep = stream.len() - 6;
    stream.truncate(keep);

    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(stream),
        DecoderOptions::new()
            .set_out_colorspace(ColorSpace::Luma)
            .set_strict_mode(false)
    );
    // lenient decoding zero fills whatever is missing
    match decoder.decode() {
        Ok(Pixels::U8(pixels)) => assert_eq!(pixels.len(), 32 * 32),
        Ok(_) => panic!("wrong output format"),
        Err(err) => panic!("lenient decode failed: {err:?}")
    }
}

#[test]
fn restart_interval_with_flipped_bit_recovers_at_next_marker() {
    let source: Vec<u8> = (0..64_u32 * 64)
        .map(|i| ((i * 7 + i / 64 * 3) % 256) as u8)
        .collect();

    let mut stream = JxtEncoder::new(
        &source,
        EncoderOptions::new(64, 64, ColorSpace::Luma, 8)
            .set_quality(80)
            .set_restart_interval(8)
    )
    .encode_to_vec()
    .unwrap();

    // flip one bit inside the first restart interval's data
    let sos_at = stream.windows(2).position(|w| w == [0xff, 0xda]).unwrap();
    let target = sos_at + 20;
    if stream[target] != 0xff && stream[target] != 0x00 && stream[target + 1] != 0x00 {
        stream[target] ^= 0x10;
    }

    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(stream),
        DecoderOptions::new()
            .set_out_colorspace(ColorSpace::Luma)
            .set_strict_mode(false)
    );

    // no fatal error: the decoder resynchronizes at restart markers
    match decoder.decode() {
        Ok(Pixels::U8(pixels)) => {
            assert_eq!(pixels.len(), 64 * 64);
            // the last rows are beyond the damaged interval and must
            // still be close to the source
            let tail = 56 * 64;
            let mut err = 0_u64;
            for (s, d) in source[tail..].iter().zip(pixels[tail..].iter()) {
                err += u64::from((i16::from(*s) - i16::from(*d)).unsigned_abs());
            }
            let mean = err / (8 * 64);
            assert!(mean <= 12, "tail mean error {mean}");
        }
        Ok(_) => panic!("wrong output format"),
        Err(err) => panic!("decoder gave up on a recoverable stream: {err:?}")
    }
}

#[test]
fn foreign_app_segments_are_skipped() {
    let source = vec![99_u8; 64];
    let stream = JxtEncoder::new(
        &source,
        EncoderOptions::new(8, 8, ColorSpace::Luma, 8)
    )
    .encode_to_vec()
    .unwrap();

    // splice an APP1 segment right after SOI
    let mut spliced = stream[..2].to_vec();
    spliced.extend_from_slice(&[0xff, 0xe1, 0x00, 0x08, b'E', b'x', b'i', b'f', 0x00, 0x00]);
    spliced.extend_from_slice(&stream[2..]);

    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(spliced),
        DecoderOptions::new().set_out_colorspace(ColorSpace::Luma)
    );
    assert!(decoder.decode().is_ok());
}
