// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::io::{Cursor, Seek, SeekFrom};

use tsvm_mov_parse::{
    AudioQueueInfo, Error, Header, ImageKind, PacketKind, PacketTag, PacketWalker, SIGNATURE, ScanConfig, ScanEnd,
    SizeFailure, WalkState,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
}

fn header(signature: [u8; 8]) -> Header {
    Header {
        signature,
        width: 560,
        height: 448,
        frame_rate: 30,
        frame_count: 2,
        unused: 0,
        audio_queue_info: AudioQueueInfo::encode(2, 2304).expect("valid audio queue"),
        reserved: [0; 10],
    }
}

/// Header followed by the given packet bytes.
fn mov(signature: [u8; 8], packets: &[u8]) -> Cursor<Vec<u8>> {
    let mut data = header(signature).to_bytes().to_vec();
    data.extend_from_slice(packets);
    Cursor::new(data)
}

fn image_packet(b1: u8, payload: &[u8]) -> Vec<u8> {
    let mut p = vec![0x04, b1];
    p.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    p.extend_from_slice(payload);
    p
}

// ============================================================================
// read_mov
// ============================================================================

#[test]
fn read_mov_typical_stream() {
    init_logger();
    let mut packets = vec![0xFF, 0xFE, 0x10, 0x20, 0x30, 0x00];
    packets.extend(image_packet(0, &[0xAB; 100]));
    packets.extend_from_slice(&[0x0C, 0x11]);
    packets.extend_from_slice(&[0u8; 504]);
    packets.extend_from_slice(&[0xFF, 0xFF]);
    packets.extend(image_packet(2, &[0xCD; 12]));
    packets.extend_from_slice(&[0xFF, 0xFF]);
    let total = 32 + packets.len() as u64;

    let analysis = tsvm_mov_parse::read_mov(&mut mov(SIGNATURE, &packets)).expect("read_mov failed");
    assert!(analysis.signature_ok);
    assert_eq!(analysis.header, header(SIGNATURE));
    assert_eq!(analysis.end, ScanEnd::EndOfStream);
    assert!(!analysis.is_desynchronized());
    assert_eq!(analysis.stream_len, total);

    let kinds: Vec<_> = analysis.packets.iter().map(|p| p.kind).collect();
    assert_eq!(kinds.len(), 6);
    assert!(matches!(kinds[0], PacketKind::BackgroundColor(Some(c)) if (c.r, c.g, c.b) == (0x10, 0x20, 0x30)));
    assert_eq!(kinds[1], PacketKind::Image { kind: ImageKind::Type1, payload_len: 100 });
    assert_eq!(kinds[2], PacketKind::Mp2Audio { rate_index: 12, frame_len: 504, estimated: false });
    assert_eq!(kinds[3], PacketKind::Sync);
    assert_eq!(kinds[4], PacketKind::Image { kind: ImageKind::Type1Delta, payload_len: 12 });
    assert_eq!(kinds[5], PacketKind::Sync);

    assert_eq!(analysis.packets[0].offset, 32);
    for pair in analysis.packets.windows(2) {
        assert_eq!(pair[0].end(), pair[1].offset, "packets must be contiguous");
    }
    assert_eq!(analysis.packets[5].end(), total);
}

#[test]
fn read_mov_audio_queue_info() {
    let mut f = mov(SIGNATURE, &[]);
    let analysis = tsvm_mov_parse::read_mov(&mut f).expect("read_mov failed");
    let info = analysis.header.audio_queue_info;
    assert_eq!(info.queue_size(), 2);
    assert_eq!(info.block_size(), 2304);
    assert!(info.has_audio());
    assert!(analysis.packets.is_empty());
    assert_eq!(analysis.end, ScanEnd::EndOfStream);
}

#[test]
fn read_mov_truncated_header() {
    let mut f = Cursor::new(SIGNATURE.to_vec());
    assert!(matches!(tsvm_mov_parse::read_mov(&mut f), Err(Error::TruncatedHeader)));
}

#[test]
fn read_mov_bad_signature_is_a_warning() {
    init_logger();
    let sig = *b"NOTAMOV!";
    let analysis = tsvm_mov_parse::read_mov(&mut mov(sig, &[0xFF, 0xFF])).expect("read_mov failed");
    assert!(!analysis.signature_ok);
    assert_eq!(analysis.packets.len(), 1);
}

#[test]
fn read_mov_bad_signature_strict() {
    let config = ScanConfig::default().require_signature(true);
    let result =
        tsvm_mov_parse::read_mov_with_config(&mut mov(*b"NOTAMOV!", &[]), &config, &tsvm_mov_parse::Unstoppable);
    match result {
        Err(Error::InvalidSignature(sig)) => assert_eq!(&sig, b"NOTAMOV!"),
        Ok(_) => panic!("Expected signature rejection"),
        Err(e) => panic!("Unexpected error: {:?}", e),
    }
}

#[test]
fn read_mov_unresolvable_keeps_earlier_packets() {
    let mut packets = vec![0xFF, 0xFF, 0x00, 0x11];
    packets.extend_from_slice(&[0u8; 144]);
    packets.extend_from_slice(&[0x77, 0x66]);
    packets.extend_from_slice(&1_000_000u32.to_le_bytes());
    packets.extend_from_slice(&[0xFF, 0xFF]);

    let analysis = tsvm_mov_parse::read_mov(&mut mov(SIGNATURE, &packets)).expect("read_mov failed");
    assert_eq!(analysis.packets.len(), 2);
    assert_eq!(
        analysis.end,
        ScanEnd::ResolutionFailed(SizeFailure::Unresolvable { candidate: Some(1_000_000) })
    );
    assert!(analysis.is_desynchronized());
}

#[test]
fn read_mov_default_cap() {
    let analysis = tsvm_mov_parse::read_mov(&mut mov(SIGNATURE, &[0xFF; 51 * 2])).expect("read_mov failed");
    assert_eq!(analysis.packets.len(), 50);
    assert_eq!(analysis.end, ScanEnd::Truncated);
    assert!(!analysis.end.is_error());
}

#[test]
fn read_mov_unlimited() {
    let config = ScanConfig::unlimited();
    let analysis = tsvm_mov_parse::read_mov_with_config(
        &mut mov(SIGNATURE, &[0xFF; 120 * 2]),
        &config,
        &tsvm_mov_parse::Unstoppable,
    )
    .expect("read_mov_with_config failed");
    assert_eq!(analysis.packets.len(), 120);
    assert_eq!(analysis.end, ScanEnd::EndOfStream);
}

#[test]
fn read_mov_cancelled() {
    struct ImmediatelyCancelled;
    impl tsvm_mov_parse::Stop for ImmediatelyCancelled {
        fn check(&self) -> std::result::Result<(), tsvm_mov_parse::StopReason> {
            Err(tsvm_mov_parse::StopReason::Cancelled)
        }
    }

    let result = tsvm_mov_parse::read_mov_with_config(
        &mut mov(SIGNATURE, &[0xFF, 0xFF]),
        &ScanConfig::default(),
        &ImmediatelyCancelled,
    );
    match result {
        Err(Error::Stopped(reason)) => assert_eq!(reason, tsvm_mov_parse::StopReason::Cancelled),
        Ok(_) => panic!("Expected cancellation"),
        Err(e) => panic!("Unexpected error: {:?}", e),
    }
}

// ============================================================================
// Resolver and walker through the public API
// ============================================================================

#[test]
fn resolve_sync_leaves_cursor_after_tag() {
    let mut f = Cursor::new(vec![0xFFu8, 0xFF, 0x12, 0x34]);
    f.seek(SeekFrom::Start(2)).unwrap();
    let r = tsvm_mov_parse::resolve_packet(&mut f, PacketTag::SYNC, 0, &ScanConfig::default()).unwrap();
    assert_eq!(r.kind, PacketKind::Sync);
    assert_eq!(r.additional, 0);
    assert_eq!(f.position(), 2);
}

#[test]
fn resolve_image_type1_advances_104() {
    let mut data = vec![0x04, 0x00];
    data.extend_from_slice(&100u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 100]);
    let mut f = Cursor::new(data);
    f.seek(SeekFrom::Start(2)).unwrap();
    let r = tsvm_mov_parse::resolve_packet(&mut f, PacketTag([0x04, 0x00]), 0, &ScanConfig::default()).unwrap();
    assert_eq!(r.kind, PacketKind::Image { kind: ImageKind::Type1, payload_len: 100 });
    assert_eq!(r.additional, 104);
    assert_eq!(f.position(), 2 + 104);
}

#[test]
fn resolve_mp2_rates() {
    let config = ScanConfig::default();
    let r = tsvm_mov_parse::resolve_packet(&mut Cursor::new(Vec::<u8>::new()), PacketTag([0x00, 0x11]), 0, &config).unwrap();
    assert_eq!(r.additional, 144);

    let r = tsvm_mov_parse::resolve_packet(&mut Cursor::new(Vec::<u8>::new()), PacketTag([0x1C, 0x11]), 0, &config).unwrap();
    assert_eq!(r.additional, 576);
    assert_eq!(r.kind, PacketKind::Mp2Audio { rate_index: 28, frame_len: 576, estimated: true });
    assert_eq!(tsvm_mov_parse::MP2_EXTENDED_RATE_GUESS, 576);
    assert_eq!(tsvm_mov_parse::MP2_FRAME_SIZES.len(), 14);
}

#[test]
fn walker_after_header() {
    init_logger();
    let mut f = mov(SIGNATURE, &[0xFF, 0xFF, 0xFF, 0xFE, 1, 2, 3, 4, 0xFF, 0xFF]);
    let header = tsvm_mov_parse::read_header(&mut f).expect("header");
    assert!(header.signature_matches());

    let mut walker = PacketWalker::new(&mut f, Header::SIZE);
    assert_eq!(walker.state(), WalkState::Scanning);
    let offsets: Vec<_> = walker.by_ref().map(|p| p.expect("packet").offset).collect();
    assert_eq!(offsets, [32, 34, 40]);
    assert_eq!(walker.state(), WalkState::Stopped(ScanEnd::EndOfStream));
    assert_eq!(walker.position(), 42);
}

#[test]
fn walker_stops_after_failure() {
    let mut f = mov(SIGNATURE, &[0xFF, 0xFF, 0x04, 0x03, 0x00, 0xFF, 0xFF]);
    tsvm_mov_parse::read_header(&mut f).expect("header");
    let mut walker = PacketWalker::new(&mut f, Header::SIZE);
    assert!(walker.next_packet().unwrap().is_some());
    assert!(walker.next_packet().unwrap().is_none());
    assert_eq!(walker.end(), Some(ScanEnd::ResolutionFailed(SizeFailure::Unreadable)));
    assert!(walker.next_packet().unwrap().is_none());
    assert_eq!(walker.packets_emitted(), 1);
}

#[test]
fn header_round_trip_public() {
    let h = header(SIGNATURE);
    let mut out = Vec::new();
    h.write(&mut out).unwrap();
    assert_eq!(out.len() as u64, Header::SIZE);
    let back = tsvm_mov_parse::read_header(&mut out.as_slice()).unwrap();
    assert_eq!(back, h);
}

#[test]
fn error_display() {
    assert_eq!(Error::TruncatedHeader.to_string(), "truncated header");
    assert_eq!(
        Error::UnresolvableSize { offset: 0x40, candidate: Some(1_000_000) }.to_string(),
        "implausible packet size 1000000 at offset 0x40"
    );
    let io: std::io::Error = Error::TruncatedHeader.into();
    assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
}
