//! Whole-stream H.264 access-unit assembly scenarios.

mod common;

use common::{h264_pps_rbsp, h264_slice_rbsp, h264_sps_rbsp, nal};
use estream::{AuParser, ChromaFormat, Codec, Pulled, ScanType};

const I_SLICE: u32 = 7;
const P_SLICE: u32 = 5;

fn expect_au(p: Pulled) -> estream::AccessUnit {
    match p {
        Pulled::Au(au) => au,
        other => panic!("expected an access unit, got {:?}", other),
    }
}

fn expect_final_au(p: Pulled) -> estream::AccessUnit {
    match p {
        Pulled::End(Some(au)) => au,
        other => panic!("expected the final access unit, got {:?}", other),
    }
}

/// SPS + PPS + IDR then a P slice: the first pull yields the IDR access
/// unit with a fresh decoder configuration, EOS yields the P slice.
#[test]
fn two_access_units_with_config() {
    let sps = nal(&[0x67], &h264_sps_rbsp(80, 45, Some((1, 60))));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let idr = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(0)));
    let p = nal(&[0x41], &h264_slice_rbsp(P_SLICE, 1, None));
    let stream: Vec<u8> = [&sps[..], &pps[..], &idr[..], &p[..]].concat();

    let mut parser = AuParser::new(Codec::H264);
    let au1 = expect_au(parser.get_au(&stream, false).unwrap());
    let expected1: Vec<u8> = [&sps[..], &pps[..], &idr[..]].concat();
    assert_eq!(&au1.data[..], &expected1[..]);
    assert!(au1.is_keyframe);
    let config = au1.new_config.expect("first AU must carry a configuration");
    assert_eq!(config.codec, Codec::H264);
    assert_eq!(config.width, 1280);
    assert_eq!(config.height, 720);
    assert_eq!(config.profile, 66);
    assert_eq!(config.level, 30);
    assert_eq!(config.bit_depth, 8);
    assert_eq!(config.chroma, ChromaFormat::C420);
    assert_eq!(config.scan, ScanType::Progressive);
    // 60 ticks/s over field pairs, reduced.
    assert_eq!((config.frame_rate_num, config.frame_rate_den), (30, 1));

    match parser.get_au(&[], false).unwrap() {
        Pulled::NeedMore => {}
        other => panic!("unterminated P slice should wait, got {:?}", other),
    }
    let au2 = expect_final_au(parser.get_au(&[], true).unwrap());
    assert_eq!(&au2.data[..], &p[..]);
    assert!(!au2.is_keyframe);
    assert!(au2.new_config.is_none());
    match parser.get_au(&[], true).unwrap() {
        Pulled::End(None) => {}
        other => panic!("drained stream, got {:?}", other),
    }
}

/// Byte framing must not matter: single-byte feeding produces the same
/// units, and their concatenation reproduces the stream.
#[test]
fn chunked_delivery_is_equivalent() {
    let sps = nal(&[0x67], &h264_sps_rbsp(40, 30, None));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let mut stream = Vec::new();
    stream.extend_from_slice(&sps);
    stream.extend_from_slice(&pps);
    for frame_num in 0..4 {
        let header = if frame_num == 0 { 0x65 } else { 0x41 };
        let slice_type = if frame_num == 0 { I_SLICE } else { P_SLICE };
        let idr = if frame_num == 0 { Some(0) } else { None };
        stream.extend_from_slice(&nal(&[header], &h264_slice_rbsp(slice_type, frame_num, idr)));
    }

    let mut whole = AuParser::new(Codec::H264);
    let mut whole_aus = Vec::new();
    match whole.get_au(&stream, false).unwrap() {
        Pulled::Au(au) => whole_aus.push(au.data.to_vec()),
        other => panic!("expected an AU, got {:?}", other),
    }
    loop {
        match whole.get_au(&[], true).unwrap() {
            Pulled::Au(au) => whole_aus.push(au.data.to_vec()),
            Pulled::End(Some(au)) => {
                whole_aus.push(au.data.to_vec());
                break;
            }
            Pulled::End(None) => break,
            Pulled::NeedMore => unreachable!("eos never needs more"),
        }
    }

    let mut chunked = AuParser::new(Codec::H264);
    let mut chunked_aus = Vec::new();
    for &b in &stream {
        match chunked.get_au(std::slice::from_ref(&b), false).unwrap() {
            Pulled::Au(au) => {
                chunked_aus.push(au.data.to_vec());
                // Drain without feeding the byte twice.
                while let Pulled::Au(au) = chunked.get_au(&[], false).unwrap() {
                    chunked_aus.push(au.data.to_vec());
                }
            }
            Pulled::NeedMore => {}
            other => panic!("unexpected mid-stream outcome {:?}", other),
        }
    }
    loop {
        match chunked.get_au(&[], true).unwrap() {
            Pulled::Au(au) => chunked_aus.push(au.data.to_vec()),
            Pulled::End(Some(au)) => {
                chunked_aus.push(au.data.to_vec());
                break;
            }
            Pulled::End(None) => break,
            Pulled::NeedMore => unreachable!(),
        }
    }

    assert_eq!(whole_aus.len(), 4);
    assert_eq!(whole_aus, chunked_aus);
    let rejoined: Vec<u8> = whole_aus.concat();
    assert_eq!(rejoined, stream);
}

/// Two IDR pictures with distinct idr_pic_id split even though frame_num
/// matches.
#[test]
fn idr_pic_id_change_splits_units() {
    let sps = nal(&[0x67], &h264_sps_rbsp(40, 30, None));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let idr_a = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(0)));
    let idr_b = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(1)));
    let stream: Vec<u8> = [&sps[..], &pps[..], &idr_a[..], &idr_b[..]].concat();

    let mut parser = AuParser::new(Codec::H264);
    let au1 = expect_au(parser.get_au(&stream, false).unwrap());
    let expected1: Vec<u8> = [&sps[..], &pps[..], &idr_a[..]].concat();
    assert_eq!(&au1.data[..], &expected1[..]);
    let au2 = expect_final_au(parser.get_au(&[], true).unwrap());
    assert_eq!(&au2.data[..], &idr_b[..]);
    assert!(au2.is_keyframe);
}

/// A slice arriving before any SPS is discarded, not emitted.
#[test]
fn pre_sps_slices_are_dropped() {
    let orphan = nal(&[0x41], &h264_slice_rbsp(P_SLICE, 3, None));
    let sps = nal(&[0x67], &h264_sps_rbsp(40, 30, None));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let idr = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(0)));
    let stream: Vec<u8> = [&orphan[..], &sps[..], &pps[..], &idr[..]].concat();

    let mut parser = AuParser::new(Codec::H264);
    match parser.get_au(&stream, false).unwrap() {
        Pulled::NeedMore => {}
        other => panic!("expected NeedMore, got {:?}", other),
    }
    let au = expect_final_au(parser.get_au(&[], true).unwrap());
    let expected: Vec<u8> = [&sps[..], &pps[..], &idr[..]].concat();
    assert_eq!(&au.data[..], &expected[..]);
    assert!(au.is_keyframe);
}

/// A new SPS with different dimensions re-emits the configuration on the
/// unit that contains it.
#[test]
fn config_reemitted_on_change() {
    let sps_big = nal(&[0x67], &h264_sps_rbsp(80, 45, None));
    let sps_small = nal(&[0x67], &h264_sps_rbsp(40, 23, None));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let idr_a = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(0)));
    let idr_b = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(1)));
    let stream: Vec<u8> =
        [&sps_big[..], &pps[..], &idr_a[..], &sps_small[..], &pps[..], &idr_b[..]].concat();

    let mut parser = AuParser::new(Codec::H264);
    let au1 = expect_au(parser.get_au(&stream, false).unwrap());
    assert_eq!(au1.new_config.as_ref().map(|c| (c.width, c.height)), Some((1280, 720)));
    let au2 = expect_final_au(parser.get_au(&[], true).unwrap());
    let expected2: Vec<u8> = [&sps_small[..], &pps[..], &idr_b[..]].concat();
    assert_eq!(&au2.data[..], &expected2[..]);
    assert_eq!(au2.new_config.as_ref().map(|c| (c.width, c.height)), Some((640, 368)));
}

/// Re-sending an identical SPS must not re-announce the configuration.
#[test]
fn duplicate_sps_is_quiet() {
    let sps = nal(&[0x67], &h264_sps_rbsp(40, 30, None));
    let pps = nal(&[0x68], &h264_pps_rbsp());
    let idr_a = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(0)));
    let idr_b = nal(&[0x65], &h264_slice_rbsp(I_SLICE, 0, Some(1)));
    let stream: Vec<u8> = [&sps[..], &pps[..], &idr_a[..], &sps[..], &pps[..], &idr_b[..]].concat();

    let mut parser = AuParser::new(Codec::H264);
    let au1 = expect_au(parser.get_au(&stream, false).unwrap());
    assert!(au1.new_config.is_some());
    let au2 = expect_final_au(parser.get_au(&[], true).unwrap());
    assert!(au2.new_config.is_none());
}
