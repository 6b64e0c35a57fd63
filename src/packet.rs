//! Packet kinds and the per-tag size rules.
//!
//! The MOV packet stream carries no common length prefix. Each packet
//! starts with a two-byte tag and the rest of its framing depends on the
//! tag, so the size of every packet must be resolved before the next one
//! can be found.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::{debug, warn};

use std::io::{Read, Seek};

use crate::{Error, Result, ScanConfig, le_u32, read_up_to, skip};

/// MP2 frame lengths in bytes, indexed by `rate_index / 2`.
pub const MP2_FRAME_SIZES: [u32; 14] = [144, 216, 252, 288, 360, 432, 504, 576, 720, 864, 1008, 1152, 1440, 1728];

/// Frame length assumed for rate indices past the end of [`MP2_FRAME_SIZES`].
///
/// This is a guess, not framing: a file that really uses an extended rate
/// with another frame length desynchronizes at that packet.
pub const MP2_EXTENDED_RATE_GUESS: u32 = 576;

const MP2_TAG: u8 = 0x11;
const IMAGE_TAG: u8 = 0x04;

/// The two bytes that open every packet, in stream order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketTag(pub [u8; 2]);

impl PacketTag {
    pub const SYNC: Self = Self([0xFF, 0xFF]);
    pub const BACKGROUND_COLOR: Self = Self([0xFF, 0xFE]);

    pub const fn bytes(self) -> [u8; 2] {
        self.0
    }
}

impl From<[u8; 2]> for PacketTag {
    fn from(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for PacketTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:02X} {:02X}]", self.0[0], self.0[1])
    }
}

impl std::fmt::Debug for PacketTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PacketTag{self}")
    }
}

/// Image payload flavor, from the second tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Type1,
    Type2,
    Type1Delta,
    /// Any other second tag byte. Only the label "Type {n + 1}" is known.
    Other(u8),
}

impl From<u8> for ImageKind {
    fn from(b: u8) -> Self {
        match b {
            0 => Self::Type1,
            1 => Self::Type2,
            2 => Self::Type1Delta,
            n => Self::Other(n),
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type1 => f.write_str("Type 1"),
            Self::Type2 => f.write_str("Type 2"),
            Self::Type1Delta => f.write_str("Type 1-delta"),
            Self::Other(n) => write!(f, "Type {}", u16::from(*n) + 1),
        }
    }
}

/// Payload of a background color packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Fourth byte, meaning unknown.
    pub extra: u8,
}

/// What a packet is, with the framing facts learned while sizing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Sync,
    /// `None` when the stream ended inside the four color bytes.
    BackgroundColor(Option<BackgroundColor>),
    /// iPF image data behind an explicit 32-bit length.
    Image { kind: ImageKind, payload_len: u32 },
    /// MP2 frame whose length comes from the rate index.
    Mp2Audio {
        rate_index: u8,
        frame_len: u32,
        /// Set when `frame_len` is [`MP2_EXTENDED_RATE_GUESS`].
        estimated: bool,
    },
    /// Unrecognized tag, skipped by a plausible-looking 32-bit length.
    Unknown { payload_len: u32 },
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => f.write_str("SYNC"),
            Self::BackgroundColor(_) => f.write_str("BACKGROUND COLOR"),
            Self::Image { kind, .. } => write!(f, "iPF {kind}"),
            Self::Mp2Audio { rate_index, .. } => write!(f, "MP2 Audio, rate index {rate_index}"),
            Self::Unknown { .. } => f.write_str("UNKNOWN"),
        }
    }
}

/// Result of sizing one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub kind: PacketKind,
    /// Bytes belonging to the packet after its tag. The stream has already
    /// been moved past them.
    pub additional: u64,
}

/// One packet of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Stream offset of the tag.
    pub offset: u64,
    pub tag: PacketTag,
    pub kind: PacketKind,
    /// Total length including the tag.
    pub size: u64,
}

impl Packet {
    /// Offset of the packet that follows this one.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Classify a packet and move `src` past the rest of it.
///
/// `src` must be positioned right after the two tag bytes. `offset` is the
/// stream offset of the tag and is only used in errors.
///
/// Fails with [`Error::UnreadableSize`] when an image packet's length field
/// is cut off, and with [`Error::UnresolvableSize`] when an unknown packet
/// has no length below `config.unknown_size_limit`. Either failure leaves
/// the stream at an unknown position relative to the real packet boundary.
pub fn resolve_packet<T: Read + Seek>(
    src: &mut T,
    tag: PacketTag,
    offset: u64,
    config: &ScanConfig,
) -> Result<Resolution> {
    let [b0, b1] = tag.bytes();
    let resolution = match (b0, b1) {
        (0xFF, 0xFF) => Resolution { kind: PacketKind::Sync, additional: 0 },
        (0xFF, 0xFE) => {
            let mut color = [0u8; 4];
            let n = read_up_to(src, &mut color)?;
            let payload = if n == color.len() {
                Some(BackgroundColor { r: color[0], g: color[1], b: color[2], extra: color[3] })
            } else {
                debug!("background color at {offset:#x} cut short ({n} bytes)");
                None
            };
            Resolution {
                kind: PacketKind::BackgroundColor(payload),
                additional: n as u64,
            }
        },
        (IMAGE_TAG, kind) => {
            let payload_len = match le_u32(src) {
                Ok(len) => len,
                Err(Error::UnexpectedEOF) => return Err(Error::UnreadableSize { offset }),
                Err(e) => return Err(e),
            };
            skip(src, payload_len.into())?;
            Resolution {
                kind: PacketKind::Image { kind: kind.into(), payload_len },
                additional: 4 + u64::from(payload_len),
            }
        },
        (rate_index, MP2_TAG) => {
            let (frame_len, estimated) = match MP2_FRAME_SIZES.get(usize::from(rate_index / 2)) {
                Some(&len) => (len, false),
                None => {
                    warn!("MP2 rate index {rate_index} at {offset:#x} is out of table, guessing {MP2_EXTENDED_RATE_GUESS} bytes");
                    (MP2_EXTENDED_RATE_GUESS, true)
                },
            };
            skip(src, frame_len.into())?;
            Resolution {
                kind: PacketKind::Mp2Audio { rate_index, frame_len, estimated },
                additional: u64::from(frame_len),
            }
        },
        _ => {
            let candidate = match le_u32(src) {
                Ok(len) => Some(len),
                Err(Error::UnexpectedEOF) => None,
                Err(e) => return Err(e),
            };
            let payload_len = match candidate {
                Some(len) if len < config.unknown_size_limit => len,
                _ => return Err(Error::UnresolvableSize { offset, candidate }),
            };
            debug!("unknown tag {tag} at {offset:#x}, guessing {payload_len} bytes");
            skip(src, payload_len.into())?;
            Resolution {
                kind: PacketKind::Unknown { payload_len },
                additional: 4 + u64::from(payload_len),
            }
        },
    };
    Ok(resolution)
}

#[cfg(test)]
fn resolve_bytes(tag: [u8; 2], rest: &[u8]) -> (Result<Resolution>, u64) {
    let mut src = std::io::Cursor::new(rest.to_vec());
    let r = resolve_packet(&mut src, PacketTag(tag), 0, &ScanConfig::default());
    (r, src.position())
}

#[test]
fn sync_has_no_body() {
    let (r, pos) = resolve_bytes([0xFF, 0xFF], &[0xAA; 8]);
    assert_eq!(r.unwrap(), Resolution { kind: PacketKind::Sync, additional: 0 });
    assert_eq!(pos, 0);
}

#[test]
fn background_color() {
    let (r, pos) = resolve_bytes([0xFF, 0xFE], &[10, 20, 30, 40, 0xFF]);
    let r = r.unwrap();
    assert_eq!(
        r.kind,
        PacketKind::BackgroundColor(Some(BackgroundColor { r: 10, g: 20, b: 30, extra: 40 }))
    );
    assert_eq!(r.additional, 4);
    assert_eq!(pos, 4);
}

#[test]
fn background_color_short_read() {
    let (r, pos) = resolve_bytes([0xFF, 0xFE], &[10, 20]);
    let r = r.unwrap();
    assert_eq!(r.kind, PacketKind::BackgroundColor(None));
    assert_eq!(r.additional, 2);
    assert_eq!(pos, 2);
}

#[test]
fn image_explicit_length() {
    let mut rest = 100u32.to_le_bytes().to_vec();
    rest.extend_from_slice(&[0u8; 100]);
    rest.extend_from_slice(&[0xFF, 0xFF]);
    let (r, pos) = resolve_bytes([0x04, 0x00], &rest);
    let r = r.unwrap();
    assert_eq!(r.kind, PacketKind::Image { kind: ImageKind::Type1, payload_len: 100 });
    assert_eq!(r.additional, 104);
    assert_eq!(pos, 104);
}

#[test]
fn image_sub_kinds() {
    for (b1, kind) in [
        (0u8, ImageKind::Type1),
        (1, ImageKind::Type2),
        (2, ImageKind::Type1Delta),
        (3, ImageKind::Other(3)),
    ] {
        let (r, _) = resolve_bytes([0x04, b1], &0u32.to_le_bytes());
        assert_eq!(r.unwrap().kind, PacketKind::Image { kind, payload_len: 0 });
    }
    assert_eq!(ImageKind::Other(3).to_string(), "Type 4");
    assert_eq!(ImageKind::Other(255).to_string(), "Type 256");
    assert_eq!(ImageKind::Type1Delta.to_string(), "Type 1-delta");
}

#[test]
fn image_unreadable_length() {
    let (r, _) = resolve_bytes([0x04, 0x01], &[1, 2, 3]);
    assert!(matches!(r, Err(Error::UnreadableSize { offset: 0 })));
}

#[test]
fn image_tag_wins_over_mp2() {
    let (r, _) = resolve_bytes([0x04, 0x11], &0u32.to_le_bytes());
    assert!(matches!(r.unwrap().kind, PacketKind::Image { kind: ImageKind::Other(0x11), .. }));
}

#[test]
fn mp2_table_lookup() {
    let (r, pos) = resolve_bytes([0x00, 0x11], &[]);
    let r = r.unwrap();
    assert_eq!(r.kind, PacketKind::Mp2Audio { rate_index: 0, frame_len: 144, estimated: false });
    assert_eq!(r.additional, 144);
    assert_eq!(pos, 144);

    for rate_index in 0u8..28 {
        // `04 11` is an image tag, so slot 2 is only reachable through rate index 5
        if rate_index == IMAGE_TAG {
            continue;
        }
        let (r, _) = resolve_bytes([rate_index, 0x11], &[]);
        assert_eq!(r.unwrap().additional, u64::from(MP2_FRAME_SIZES[usize::from(rate_index / 2)]));
    }
    let (r, _) = resolve_bytes([27, 0x11], &[]);
    assert_eq!(r.unwrap().additional, 1728);
    let (r, _) = resolve_bytes([5, 0x11], &[]);
    assert_eq!(r.unwrap().additional, 252);
}

#[test]
fn mp2_extended_rate_is_estimated() {
    let (r, pos) = resolve_bytes([0x1C, 0x11], &[]);
    let r = r.unwrap();
    assert_eq!(r.kind, PacketKind::Mp2Audio { rate_index: 28, frame_len: 576, estimated: true });
    assert_eq!(r.additional, 576);
    assert_eq!(pos, 576);
}

#[test]
fn unknown_plausible_length() {
    let mut rest = 6u32.to_le_bytes().to_vec();
    rest.extend_from_slice(&[0u8; 6]);
    let (r, pos) = resolve_bytes([0x20, 0x30], &rest);
    let r = r.unwrap();
    assert_eq!(r.kind, PacketKind::Unknown { payload_len: 6 });
    assert_eq!(r.additional, 10);
    assert_eq!(pos, 10);
}

#[test]
fn unknown_implausible_length() {
    let (r, _) = resolve_bytes([0x20, 0x30], &1_000_000u32.to_le_bytes());
    assert!(matches!(r, Err(Error::UnresolvableSize { candidate: Some(1_000_000), .. })));

    let (r, _) = resolve_bytes([0x20, 0x30], &999_999u32.to_le_bytes());
    assert_eq!(r.unwrap().kind, PacketKind::Unknown { payload_len: 999_999 });
}

#[test]
fn unknown_without_length() {
    let (r, _) = resolve_bytes([0x20, 0x30], &[1]);
    assert!(matches!(r, Err(Error::UnresolvableSize { candidate: None, .. })));
}

#[test]
fn unknown_limit_is_configurable() {
    let mut src = std::io::Cursor::new(50u32.to_le_bytes().to_vec());
    let config = ScanConfig::default().with_unknown_size_limit(50);
    let r = resolve_packet(&mut src, PacketTag([0x20, 0x30]), 7, &config);
    assert!(matches!(r, Err(Error::UnresolvableSize { offset: 7, candidate: Some(50) })));
}

#[test]
fn kind_labels() {
    assert_eq!(PacketKind::Sync.to_string(), "SYNC");
    assert_eq!(PacketKind::BackgroundColor(None).to_string(), "BACKGROUND COLOR");
    assert_eq!(
        PacketKind::Mp2Audio { rate_index: 4, frame_len: 252, estimated: false }.to_string(),
        "MP2 Audio, rate index 4"
    );
    assert_eq!(PacketTag([0x04, 0x02]).to_string(), "[04 02]");
}
