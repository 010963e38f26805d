use jxt::{
    ColorSpace, ColorTransformKind, DecoderOptions, EncoderOptions, FrameFlags, FrameKind,
    JxtDecoder, JxtEncoder, Pixels
};
use jxt_core::bytestream::XtCursor;

use crate::test_image;

fn round_trip(options: EncoderOptions, out: ColorSpace, source: &[u8]) -> Vec<u8> {
    let stream = JxtEncoder::new(source, options).encode_to_vec().unwrap();
    let mut decoder = JxtDecoder::new_with_options(
        XtCursor::new(stream),
        DecoderOptions::new().set_out_colorspace(out)
    );
    match decoder.decode().unwrap() {
        Pixels::U8(pixels) => pixels,
        _ => panic!("expected 8 bit output")
    }
}

#[test]
fn every_frame_kind_round_trips() {
    let source = test_image(24, 16, 1);

    for kind in [
        FrameKind::Baseline,
        FrameKind::Sequential,
        FrameKind::Progressive,
        FrameKind::Lossless
    ] {
        let options = EncoderOptions::new(24, 16, ColorSpace::Luma, 8)
            .set_frame_kind(kind)
            .set_quality(90)
            .set_color_transform(ColorTransformKind::None);
        let decoded = round_trip(options, ColorSpace::Luma, &source);
        assert_eq!(decoded.len(), source.len(), "{kind:?}");

        if kind == FrameKind::Lossless {
            assert_eq!(decoded, source);
        } else {
            for (s, d) in source.iter().zip(decoded.iter()) {
                assert!((i16::from(*s) - i16::from(*d)).abs() <= 24, "{kind:?}");
            }
        }
    }
}

#[test]
fn color_image_survives_the_default_pipeline() {
    let source = test_image(16, 16, 3);

    let options = EncoderOptions::new(16, 16, ColorSpace::RGB, 8).set_quality(95);
    let decoded = round_trip(options, ColorSpace::RGB, &source);

    for (s, d) in source.iter().zip(decoded.iter()) {
        assert!((i16::from(*s) - i16::from(*d)).abs() <= 16);
    }
}

#[test]
fn reversible_plus_residual_is_exact_two_ways() {
    let source = test_image(16, 16, 1);

    // the reversible DCT alone
    let reversible = EncoderOptions::new(16, 16, ColorSpace::Luma, 8)
        .set_frame_kind(FrameKind::Sequential)
        .set_color_transform(ColorTransformKind::None)
        .set_flags(FrameFlags {
            reversible_dct: true,
            ..FrameFlags::default()
        });
    assert_eq!(round_trip(reversible, ColorSpace::Luma, &source), source);

    // a lossy base rescued by the residual layer
    let residual = EncoderOptions::new(16, 16, ColorSpace::Luma, 8)
        .set_quality(25)
        .set_color_transform(ColorTransformKind::None)
        .set_flags(FrameFlags {
            residual_coding: true,
            ..FrameFlags::default()
        })
        .set_hdr_quality(100);
    assert_eq!(round_trip(residual, ColorSpace::Luma, &source), source);
}

#[test]
fn headers_expose_image_info_before_pixels() {
    let source = test_image(40, 20, 1);
    let stream = JxtEncoder::new(
        &source,
        EncoderOptions::new(40, 20, ColorSpace::Luma, 8)
    )
    .encode_to_vec()
    .unwrap();

    let mut decoder = JxtDecoder::from_vec(stream);
    assert!(decoder.info().is_none());
    decoder.decode_headers().unwrap();

    let info = decoder.info().unwrap();
    assert_eq!(info.width, 40);
    assert_eq!(info.height, 20);
    assert_eq!(info.precision, 8);
    assert_eq!(info.components, 1);
}
