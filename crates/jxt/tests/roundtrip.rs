//! End to end encode/decode behavior.

use jxt::{
    ColorSpace, ColorTransformKind, DecoderOptions, EncoderOptions, FrameFlags, FrameKind,
    JxtDecoder, JxtEncoder, Pixels, StopPoint, ToneMapSpec
};
use jxt_core::bytestream::XtCursor;
use jxt_core::sample::{f16_bits_to_f32, f32_to_f16_bits};

/// Deterministic xorshift samples, the same on every run.
fn pseudo_random(len: usize, modulo: u32, mut state: u64) -> Vec<u16> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push((state as u32 % modulo) as u16);
    }
    out
}

fn gray_options(size: usize) -> EncoderOptions {
    EncoderOptions::new(size, size, ColorSpace::Luma, 8)
}

fn decode_u8(data: Vec<u8>, out: ColorSpace) -> Vec<u8> {
    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(data),
        DecoderOptions::new().set_out_colorspace(out)
    );
    match decoder.decode().unwrap() {
        Pixels::U8(pixels) => pixels,
        _ => panic!("expected 8 bit pixels")
    }
}

fn decode_u16(data: Vec<u8>, out: ColorSpace) -> Vec<u16> {
    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(data),
        DecoderOptions::new().set_out_colorspace(out)
    );
    match decoder.decode().unwrap() {
        Pixels::U16(pixels) => pixels,
        _ => panic!("expected 16 bit pixels")
    }
}

/// A flat gray block compresses to a single DC symbol and the stream
/// carries exactly the canonical marker sequence.
#[test]
fn flat_gray_baseline_stream_shape() {
    let pixels = vec![128_u8; 64];
    let options = gray_options(8).set_quality(75);
    let stream = JxtEncoder::new(&pixels, options).encode_to_vec().unwrap();

    // canonical order: SOI, DQT, SOF0, DHT, SOS ... EOI
    let mut markers = vec![];
    let mut i = 0;
    while i + 1 < stream.len() {
        if stream[i] == 0xff && stream[i + 1] != 0x00 && stream[i + 1] != 0xff {
            markers.push(stream[i + 1]);
            if stream[i + 1] == 0xda {
                break;
            }
            // skip the segment body
            if !matches!(stream[i + 1], 0xd8 | 0xd9) {
                let len = u16::from_be_bytes([stream[i + 2], stream[i + 3]]) as usize;
                i += 2 + len;
                continue;
            }
        }
        i += 1;
    }
    assert_eq!(markers, vec![0xd8, 0xdb, 0xc0, 0xc4, 0xc4, 0xda]);
    assert_eq!(&stream[stream.len() - 2..], &[0xff, 0xd9]);

    let decoded = decode_u8(stream, ColorSpace::Luma);
    assert!(decoded.iter().all(|&p| (i16::from(p) - 128).abs() <= 1));
}

/// Sequential + reversible DCT + no color transform is bit exact.
#[test]
fn reversible_dct_round_trip_is_bit_exact() {
    let source: Vec<u8> = pseudo_random(64, 256, 0x1234_5678_9abc_def0)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = gray_options(8)
        .set_frame_kind(FrameKind::Sequential)
        .set_color_transform(ColorTransformKind::None)
        .set_flags(FrameFlags {
            reversible_dct: true,
            ..FrameFlags::default()
        });

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    let decoded = decode_u8(stream, ColorSpace::Luma);

    assert_eq!(source, decoded);
}

/// The reversible path is exact whatever the quality knob says: its
/// quantization steps are pinned to one.
#[test]
fn reversible_dct_ignores_the_quality_setting() {
    let source: Vec<u8> = pseudo_random(24 * 24, 256, 1337)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    for quality in [20_u8, 80, 100] {
        let options = EncoderOptions::new(24, 24, ColorSpace::Luma, 8)
            .set_quality(quality)
            .set_frame_kind(FrameKind::Sequential)
            .set_color_transform(ColorTransformKind::None)
            .set_flags(FrameFlags {
                reversible_dct: true,
                ..FrameFlags::default()
            });

        let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

        // the DQT on the wire carries unity steps
        let dqt_at = stream.windows(2).position(|w| w == [0xff, 0xdb]).unwrap();
        assert_eq!(&stream[dqt_at + 5..dqt_at + 5 + 64], &[1_u8; 64]);

        assert_eq!(source, decode_u8(stream, ColorSpace::Luma), "quality {quality}");
    }
}

/// The reversible path is exact on larger images too.
#[test]
fn reversible_dct_round_trip_larger_image() {
    let source: Vec<u8> = pseudo_random(40 * 24, 256, 42)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = EncoderOptions::new(40, 24, ColorSpace::Luma, 8)
        .set_frame_kind(FrameKind::Sequential)
        .set_color_transform(ColorTransformKind::None)
        .set_flags(FrameFlags {
            reversible_dct: true,
            ..FrameFlags::default()
        });

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    assert_eq!(source, decode_u8(stream, ColorSpace::Luma));
}

/// A 1000 MCU image with a restart interval of 100 carries exactly nine
/// restart markers cycling RST0..RST7, RST0.
#[test]
fn restart_markers_cycle() {
    // 200x40 gray = 25 x 5 MCUs = 125... use 320x200: 40x25 = 1000 MCUs
    let source: Vec<u8> = pseudo_random(320 * 200, 256, 7)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = EncoderOptions::new(320, 200, ColorSpace::Luma, 8)
        .set_quality(60)
        .set_restart_interval(100);

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

    // find the scan data and the restart markers inside it
    let mut restarts = vec![];
    let mut i = 0;
    let mut in_scan = false;
    while i + 1 < stream.len() {
        if stream[i] == 0xff {
            let kind = stream[i + 1];
            if in_scan && (0xd0..=0xd7).contains(&kind) {
                restarts.push(kind - 0xd0);
                i += 2;
                continue;
            }
            if kind == 0xda {
                in_scan = true;
                let len = u16::from_be_bytes([stream[i + 2], stream[i + 3]]) as usize;
                i += 2 + len;
                continue;
            }
        }
        i += 1;
    }

    assert_eq!(restarts, vec![0, 1, 2, 3, 4, 5, 6, 7, 0]);

    // and the stream still decodes
    let decoded = decode_u8(stream, ColorSpace::Luma);
    assert_eq!(decoded.len(), 320 * 200);
}

/// The progressive default script reproduces the image within a small
/// error and emits seven scans for color input.
#[test]
fn progressive_seven_scan_round_trip() {
    let mut source = vec![0_u8; 16 * 16 * 3];
    for y in 0..16 {
        for x in 0..16 {
            let i = (y * 16 + x) * 3;
            source[i] = (x * 16) as u8;
            source[i + 1] = (y * 16) as u8;
            source[i + 2] = ((x + y) * 8) as u8;
        }
    }

    let options = EncoderOptions::new(16, 16, ColorSpace::RGB, 8)
        .set_frame_kind(FrameKind::Progressive)
        .set_quality(50);

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

    // count SOS segments
    let mut scans = 0;
    let mut i = 0;
    while i + 1 < stream.len() {
        if stream[i] == 0xff && stream[i + 1] == 0xda {
            scans += 1;
        }
        i += 1;
    }
    assert_eq!(scans, 7);

    let decoded = decode_u8(stream, ColorSpace::RGB);
    assert_eq!(decoded.len(), source.len());

    // quality 50 keeps a smooth gradient reasonably close
    for (s, d) in source.iter().zip(decoded.iter()) {
        assert!((i16::from(*s) - i16::from(*d)).abs() <= 32, "{s} vs {d}");
    }
}

/// Progressive and sequential renditions of the same image decode to the
/// same pixels.
#[test]
fn progressive_matches_sequential() {
    let source: Vec<u8> = pseudo_random(32 * 32, 256, 99)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let sequential = JxtEncoder::new(
        &source,
        EncoderOptions::new(32, 32, ColorSpace::Luma, 8).set_quality(85)
    )
    .encode_to_vec()
    .unwrap();

    let progressive = JxtEncoder::new(
        &source,
        EncoderOptions::new(32, 32, ColorSpace::Luma, 8)
            .set_quality(85)
            .set_frame_kind(FrameKind::Progressive)
    )
    .encode_to_vec()
    .unwrap();

    assert_eq!(
        decode_u8(sequential, ColorSpace::Luma),
        decode_u8(progressive, ColorSpace::Luma)
    );
}

/// Huffman optimization changes the tables, not the pixels.
#[test]
fn optimized_huffman_matches_default_tables() {
    let source: Vec<u8> = pseudo_random(24 * 24, 256, 1)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let plain = JxtEncoder::new(
        &source,
        EncoderOptions::new(24, 24, ColorSpace::Luma, 8).set_quality(70)
    )
    .encode_to_vec()
    .unwrap();

    let optimized = JxtEncoder::new(
        &source,
        EncoderOptions::new(24, 24, ColorSpace::Luma, 8)
            .set_quality(70)
            .set_flags(FrameFlags {
                optimize_huffman: true,
                ..FrameFlags::default()
            })
    )
    .encode_to_vec()
    .unwrap();

    assert_eq!(
        decode_u8(plain, ColorSpace::Luma),
        decode_u8(optimized, ColorSpace::Luma)
    );
}

/// The arithmetic coder reproduces the Huffman coder's pixels exactly.
#[test]
fn arithmetic_sequential_matches_huffman() {
    let source: Vec<u8> = pseudo_random(24 * 16, 256, 3)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let huffman = JxtEncoder::new(
        &source,
        EncoderOptions::new(24, 16, ColorSpace::Luma, 8).set_quality(75)
    )
    .encode_to_vec()
    .unwrap();

    let arithmetic = JxtEncoder::new(
        &source,
        EncoderOptions::new(24, 16, ColorSpace::Luma, 8)
            .set_quality(75)
            .set_frame_kind(FrameKind::Sequential)
            .set_flags(FrameFlags {
                arithmetic: true,
                ..FrameFlags::default()
            })
    )
    .encode_to_vec()
    .unwrap();

    assert_eq!(
        decode_u8(huffman, ColorSpace::Luma),
        decode_u8(arithmetic, ColorSpace::Luma)
    );
}

/// Lossless predictive coding is exact at 8 and 12 bits.
#[test]
fn lossless_predictive_round_trip() {
    // 8 bit
    let source: Vec<u8> = pseudo_random(20 * 12, 256, 11)
        .into_iter()
        .map(|v| v as u8)
        .collect();
    let options = EncoderOptions::new(20, 12, ColorSpace::Luma, 8)
        .set_frame_kind(FrameKind::Lossless)
        .set_color_transform(ColorTransformKind::None);
    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    assert_eq!(source, decode_u8(stream, ColorSpace::Luma));

    // 12 bit
    let source = pseudo_random(20 * 12, 4096, 12);
    let options = EncoderOptions::new(20, 12, ColorSpace::Luma, 12)
        .set_frame_kind(FrameKind::Lossless)
        .set_color_transform(ColorTransformKind::None);
    let stream = JxtEncoder::new_u16(&source, options).encode_to_vec().unwrap();
    assert_eq!(source, decode_u16(stream, ColorSpace::Luma));
}

/// Lossless RGB through the reversible color transform stays exact.
#[test]
fn lossless_rct_round_trip() {
    let source: Vec<u8> = pseudo_random(12 * 12 * 3, 256, 21)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = EncoderOptions::new(12, 12, ColorSpace::RGB, 8)
        .set_frame_kind(FrameKind::Lossless)
        .set_color_transform(ColorTransformKind::Rct);
    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

    assert_eq!(source, decode_u8(stream, ColorSpace::RGB));
}

/// The near lossless mode respects its error bound sample by sample.
#[test]
fn near_lossless_error_bound_holds() {
    for near in [1_u16, 2, 4] {
        let source = pseudo_random(24 * 18, 256, u64::from(near));

        let options = EncoderOptions::new(24, 18, ColorSpace::Luma, 8)
            .set_frame_kind(FrameKind::JpegLs)
            .set_color_transform(ColorTransformKind::None)
            .set_error_bound(near);
        let source_u8: Vec<u8> = source.iter().map(|&v| v as u8).collect();
        let stream = JxtEncoder::new(&source_u8, options).encode_to_vec().unwrap();
        let decoded = decode_u8(stream, ColorSpace::Luma);

        for (s, d) in source_u8.iter().zip(decoded.iter()) {
            assert!(
                (i16::from(*s) - i16::from(*d)).unsigned_abs() <= near,
                "{s} vs {d} at bound {near}"
            );
        }
    }
}

/// A lossy base with a residual layer reconstructs bit exactly.
#[test]
fn residual_layer_restores_losslessness() {
    let source: Vec<u8> = pseudo_random(16 * 16, 256, 77)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = gray_options(16)
        .set_quality(40)
        .set_color_transform(ColorTransformKind::None)
        .set_flags(FrameFlags {
            residual_coding: true,
            ..FrameFlags::default()
        })
        .set_hdr_quality(100);

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    let decoded = decode_u8(stream, ColorSpace::Luma);

    assert_eq!(source, decoded);
}

/// Residual losslessness also holds over a color baseline.
#[test]
fn residual_layer_color_round_trip() {
    let source: Vec<u8> = pseudo_random(8 * 8 * 3, 256, 5)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = EncoderOptions::new(8, 8, ColorSpace::RGB, 8)
        .set_quality(30)
        .set_flags(FrameFlags {
            residual_coding: true,
            ..FrameFlags::default()
        })
        .set_hdr_quality(100);

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    assert_eq!(source, decode_u8(stream, ColorSpace::RGB));
}

/// Hidden coefficient bits sharpen the reconstruction of a mid quality
/// stream.
#[test]
fn hidden_bits_refine_the_base_layer() {
    let mut source = vec![0_u8; 32 * 32];
    for y in 0..32 {
        for x in 0..32 {
            source[y * 32 + x] = ((x * 5 + y * 3) % 256) as u8;
        }
    }

    let error_of = |hidden: u8| -> u64 {
        let options = EncoderOptions::new(32, 32, ColorSpace::Luma, 8)
            .set_quality(50)
            .set_hidden_dct_bits(hidden);
        let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
        let decoded = decode_u8(stream, ColorSpace::Luma);
        source
            .iter()
            .zip(decoded.iter())
            .map(|(&s, &d)| u64::from((i16::from(s) - i16::from(d)).unsigned_abs()))
            .sum()
    };

    let plain = error_of(0);
    let refined = error_of(3);
    assert!(
        refined <= plain,
        "hidden bits should not lose precision: {refined} vs {plain}"
    );
}

/// An HDR float image round trips through tone map plus lossless residual
/// to the exact half floats.
#[test]
fn hdr_residual_round_trip_is_half_float_exact() {
    let mut source = Vec::with_capacity(32 * 32);
    for y in 0..32_u32 {
        for x in 0..32_u32 {
            let value = (x as f32 / 31.0).powf(2.0) * (1.0 + y as f32 / 8.0);
            source.push(value);
        }
    }

    let options = EncoderOptions::new(32, 32, ColorSpace::Luma, 8)
        .set_tone_map(Some(ToneMapSpec::Gamma {
            gamma:    2.4,
            exposure: 1.0
        }))
        .set_flags(FrameFlags {
            residual_coding: true,
            ..FrameFlags::default()
        })
        .set_hdr_quality(100);

    let stream = JxtEncoder::new_f32(&source, options).encode_to_vec().unwrap();

    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(stream),
        DecoderOptions::new().set_out_colorspace(ColorSpace::Luma)
    );
    let decoded = match decoder.decode().unwrap() {
        Pixels::F32(pixels) => pixels,
        _ => panic!("expected float pixels")
    };

    assert_eq!(decoded.len(), source.len());
    for (s, d) in source.iter().zip(decoded.iter()) {
        // equality at half float resolution
        assert_eq!(f32_to_f16_bits(*s), f32_to_f16_bits(*d), "{s} vs {d}");
        assert_eq!(f16_bits_to_f32(f32_to_f16_bits(*s)), *d);
    }
}

/// The suspension schedule does not change the output.
#[test]
fn suspension_points_do_not_change_pixels() {
    let source: Vec<u8> = pseudo_random(16 * 16, 256, 123)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = gray_options(16)
        .set_frame_kind(FrameKind::Progressive)
        .set_quality(90);
    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

    let all_at_once = decode_u8(stream.clone(), ColorSpace::Luma);

    for stop in [StopPoint::ImageHeader, StopPoint::Scan, StopPoint::Frame] {
        let mut decoder = JxtDecoder::new_with_options(
            XtCursor::new(stream.clone()),
            DecoderOptions::new()
                .set_out_colorspace(ColorSpace::Luma)
                .set_stop_at(stop)
        );
        // step until done, then collect
        let mut steps = 0;
        loop {
            let progress = decoder.advance().unwrap();
            steps += 1;
            assert!(steps < 100, "driver failed to make progress");
            if progress == jxt::DecodeProgress::Done {
                break;
            }
        }
        match decoder.decode().unwrap() {
            Pixels::U8(pixels) => assert_eq!(pixels, all_at_once, "{stop:?}"),
            _ => panic!("expected 8 bit pixels")
        }
    }
}

/// Chroma subsampling survives the round trip within tolerance.
#[test]
fn subsampled_color_round_trip() {
    let mut source = vec![0_u8; 32 * 32 * 3];
    for y in 0..32 {
        for x in 0..32 {
            let i = (y * 32 + x) * 3;
            source[i] = (x * 8) as u8;
            source[i + 1] = (y * 8) as u8;
            source[i + 2] = 128;
        }
    }

    let options = EncoderOptions::new(32, 32, ColorSpace::RGB, 8)
        .set_quality(90)
        .set_subsampling(vec![(2, 2), (1, 1), (1, 1)]);

    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();
    let decoded = decode_u8(stream, ColorSpace::RGB);

    // smooth gradients survive 4:2:0 within a generous bound
    for (s, d) in source.iter().zip(decoded.iter()) {
        assert!((i16::from(*s) - i16::from(*d)).abs() <= 48);
    }
}

/// DNL delivered height decodes to the same image as an upfront height.
#[test]
fn dnl_height_round_trip() {
    let source: Vec<u8> = pseudo_random(16 * 24, 256, 55)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let upfront = JxtEncoder::new(
        &source,
        EncoderOptions::new(16, 24, ColorSpace::Luma, 8).set_quality(80)
    )
    .encode_to_vec()
    .unwrap();

    let deferred = JxtEncoder::new(
        &source,
        EncoderOptions::new(16, 24, ColorSpace::Luma, 8)
            .set_quality(80)
            .set_write_dnl(true)
    )
    .encode_to_vec()
    .unwrap();

    // the deferred stream declares zero height in its SOF
    let sof_at = deferred.windows(2).position(|w| w == [0xff, 0xc0]).unwrap();
    assert_eq!(&deferred[sof_at + 5..sof_at + 7], &[0, 0]);

    assert_eq!(
        decode_u8(upfront, ColorSpace::Luma),
        decode_u8(deferred, ColorSpace::Luma)
    );
}

/// Dead-zone quantization shrinks AC coefficients towards zero without
/// touching DC, so a flat image encodes identically and a noisy one
/// still decodes within its quantization tolerance.
#[test]
fn dead_zone_quantization_round_trips() {
    let flat = vec![77_u8; 16 * 16];
    let plain_flat = JxtEncoder::new(
        &flat,
        EncoderOptions::new(16, 16, ColorSpace::Luma, 8).set_quality(50)
    )
    .encode_to_vec()
    .unwrap();
    let dz_flat = JxtEncoder::new(
        &flat,
        EncoderOptions::new(16, 16, ColorSpace::Luma, 8)
            .set_quality(50)
            .set_dead_zone(true)
    )
    .encode_to_vec()
    .unwrap();
    // only AC bands have the widened bin, a DC-only image is untouched
    assert_eq!(plain_flat, dz_flat);

    let noisy: Vec<u8> = pseudo_random(24 * 24, 256, 31)
        .into_iter()
        .map(|v| v as u8)
        .collect();
    let plain = JxtEncoder::new(
        &noisy,
        EncoderOptions::new(24, 24, ColorSpace::Luma, 8).set_quality(40)
    )
    .encode_to_vec()
    .unwrap();
    let dz = JxtEncoder::new(
        &noisy,
        EncoderOptions::new(24, 24, ColorSpace::Luma, 8)
            .set_quality(40)
            .set_dead_zone(true)
    )
    .encode_to_vec()
    .unwrap();

    // on noisy data some coefficients land in the widened bin
    assert_ne!(plain, dz);

    let decoded = decode_u8(dz, ColorSpace::Luma);
    assert_eq!(decoded.len(), noisy.len());
}

/// Custom quantization tables override the quality scaling.
#[test]
fn custom_quant_tables_are_honored() {
    let source: Vec<u8> = pseudo_random(16 * 16, 256, 9)
        .into_iter()
        .map(|v| v as u8)
        .collect();

    let options = gray_options(16).set_quant_tables(vec![[1_u16; 64]]);
    let stream = JxtEncoder::new(&source, options).encode_to_vec().unwrap();

    // the DQT segment carries the flat table
    let dqt_at = stream.windows(2).position(|w| w == [0xff, 0xdb]).unwrap();
    assert_eq!(&stream[dqt_at + 5..dqt_at + 5 + 64], &[1_u8; 64]);

    // unit steps reconstruct very closely
    let decoded = decode_u8(stream, ColorSpace::Luma);
    for (s, d) in source.iter().zip(decoded.iter()) {
        assert!((i16::from(*s) - i16::from(*d)).abs() <= 2);
    }
}

/// Higher quality never reconstructs worse on the L1 metric.
#[test]
fn quality_improves_reconstruction() {
    let mut source = vec![0_u8; 24 * 24];
    for y in 0..24 {
        for x in 0..24 {
            source[y * 24 + x] = ((x * 11 + y * 7) % 256) as u8;
        }
    }

    let error_at = |quality: u8| -> u64 {
        let stream = JxtEncoder::new(
            &source,
            EncoderOptions::new(24, 24, ColorSpace::Luma, 8).set_quality(quality)
        )
        .encode_to_vec()
        .unwrap();
        let decoded = decode_u8(stream, ColorSpace::Luma);
        source
            .iter()
            .zip(decoded.iter())
            .map(|(&s, &d)| u64::from((i16::from(s) - i16::from(d)).unsigned_abs()))
            .sum()
    };

    let coarse = error_at(20);
    let medium = error_at(60);
    let fine = error_at(95);

    assert!(medium <= coarse, "{medium} > {coarse}");
    assert!(fine <= medium, "{fine} > {medium}");
}
