//! The fixed 32-byte record at the start of every MOV file.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use std::io::{Read, Write};

use crate::{Error, Result, le_u16, le_u32, read_up_to};

/// Expected first eight bytes of a MOV file, `"\x1FTSVMMOV"`.
pub const SIGNATURE: [u8; 8] = [0x1F, 0x54, 0x53, 0x56, 0x4D, 0x4D, 0x4F, 0x56];

/// Packed audio configuration stored in the header.
///
/// ```text
/// bit 15..12  queue size (0-15)
/// bit 11..0   block size in units of 4 bytes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioQueueInfo(u16);

impl AudioQueueInfo {
    const BLOCK_UNIT: u32 = 4;
    const MAX_QUEUE_SIZE: u8 = 0xF;
    const MAX_BLOCK_UNITS: u32 = 0xFFF;

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Pack a queue size and a block size in bytes.
    pub fn encode(queue_size: u8, block_size: u32) -> Result<Self> {
        if queue_size > Self::MAX_QUEUE_SIZE {
            return Err(Error::InvalidData("audio queue size must fit in 4 bits"));
        }
        if block_size % Self::BLOCK_UNIT != 0 {
            return Err(Error::InvalidData("audio block size must be a multiple of 4"));
        }
        let units = block_size / Self::BLOCK_UNIT;
        if units > Self::MAX_BLOCK_UNITS {
            return Err(Error::InvalidData("audio block size must fit in 12 bits"));
        }
        Ok(Self((u16::from(queue_size) << 12) | units as u16))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Number of queued audio blocks.
    pub const fn queue_size(self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// Size of one audio block in bytes.
    pub const fn block_size(self) -> u32 {
        (self.0 & 0x0FFF) as u32 * Self::BLOCK_UNIT
    }

    pub const fn has_audio(self) -> bool {
        self.queue_size() > 0
    }
}

/// Decoded MOV file header.
///
/// `unused` and `reserved` carry no meaning but are kept so the header
/// re-encodes byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub signature: [u8; 8],
    pub width: u16,
    pub height: u16,
    pub frame_rate: u16,
    pub frame_count: u32,
    pub unused: u16,
    pub audio_queue_info: AudioQueueInfo,
    pub reserved: [u8; 10],
}

impl Header {
    /// Size of the header in bytes. Packets start right after it.
    pub const SIZE: u64 = 32;

    pub fn signature_matches(&self) -> bool {
        self.signature == SIGNATURE
    }

    /// Little-endian encoding, the exact inverse of [`read_header`].
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..8].copy_from_slice(&self.signature);
        LittleEndian::write_u16(&mut buf[8..10], self.width);
        LittleEndian::write_u16(&mut buf[10..12], self.height);
        LittleEndian::write_u16(&mut buf[12..14], self.frame_rate);
        LittleEndian::write_u32(&mut buf[14..18], self.frame_count);
        LittleEndian::write_u16(&mut buf[18..20], self.unused);
        LittleEndian::write_u16(&mut buf[20..22], self.audio_queue_info.raw());
        buf[22..32].copy_from_slice(&self.reserved);
        buf
    }

    pub fn write<W: Write>(&self, dst: &mut W) -> Result<()> {
        dst.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Read and decode the header from the start of a MOV stream.
///
/// Consumes exactly [`Header::SIZE`] bytes on success. A signature mismatch
/// is logged and left for the caller to judge via
/// [`Header::signature_matches`]; it does not fail the read.
pub fn read_header<T: Read>(src: &mut T) -> Result<Header> {
    let mut buf = [0u8; 32];
    let n = read_up_to(src, &mut buf)?;
    if n < buf.len() {
        debug!("header short read: {n} of {} bytes", buf.len());
        return Err(Error::TruncatedHeader);
    }

    let src = &mut &buf[8..];
    let mut signature = [0u8; 8];
    signature.copy_from_slice(&buf[..8]);
    let width = le_u16(src)?;
    let height = le_u16(src)?;
    let frame_rate = le_u16(src)?;
    let frame_count = le_u32(src)?;
    let unused = le_u16(src)?;
    let audio_queue_info = AudioQueueInfo::from_raw(le_u16(src)?);
    let mut reserved = [0u8; 10];
    reserved.copy_from_slice(src);

    let header = Header {
        signature,
        width,
        height,
        frame_rate,
        frame_count,
        unused,
        audio_queue_info,
        reserved,
    };
    if !header.signature_matches() {
        warn!("unexpected signature {signature:02X?}, continuing");
    }
    debug!(
        "header: {width}x{height} @ {frame_rate} fps, {frame_count} frames, audio queue {:#06x}",
        audio_queue_info.raw()
    );
    Ok(header)
}

#[cfg(test)]
fn sample_header_bytes() -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(&SIGNATURE);
    buf[8..10].copy_from_slice(&560u16.to_le_bytes());
    buf[10..12].copy_from_slice(&448u16.to_le_bytes());
    buf[12..14].copy_from_slice(&30u16.to_le_bytes());
    buf[14..18].copy_from_slice(&1200u32.to_le_bytes());
    buf[18..20].copy_from_slice(&0xBEEFu16.to_le_bytes());
    buf[20..22].copy_from_slice(&0x1048u16.to_le_bytes());
    buf[22..32].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    buf
}

#[test]
fn header_fields_are_little_endian() {
    let bytes = sample_header_bytes();
    let header = read_header(&mut &bytes[..]).unwrap();
    assert!(header.signature_matches());
    assert_eq!(header.width, 560);
    assert_eq!(header.height, 448);
    assert_eq!(header.frame_rate, 30);
    assert_eq!(header.frame_count, 1200);
    assert_eq!(header.unused, 0xBEEF);
    assert_eq!(header.audio_queue_info.raw(), 0x1048);
    assert_eq!(header.reserved, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn header_round_trip() {
    let bytes = sample_header_bytes();
    let header = read_header(&mut &bytes[..]).unwrap();
    assert_eq!(header.to_bytes(), bytes);

    let mut out = Vec::new();
    header.write(&mut out).unwrap();
    assert_eq!(out, bytes);
}

#[test]
fn header_consumes_exactly_32_bytes() {
    let mut data = sample_header_bytes().to_vec();
    data.extend_from_slice(&[0xFF, 0xFF]);
    let mut src = std::io::Cursor::new(data);
    read_header(&mut src).unwrap();
    assert_eq!(src.position(), Header::SIZE);
}

#[test]
fn header_truncated() {
    let bytes = sample_header_bytes();
    assert!(matches!(read_header(&mut &bytes[..31]), Err(Error::TruncatedHeader)));
    assert!(matches!(read_header(&mut &b""[..]), Err(Error::TruncatedHeader)));
}

#[test]
fn header_bad_signature_still_decodes() {
    let mut bytes = sample_header_bytes();
    bytes[0] = 0x00;
    let header = read_header(&mut &bytes[..]).unwrap();
    assert!(!header.signature_matches());
    assert_eq!(header.width, 560);
}

#[test]
fn audio_queue_info_decode() {
    let info = AudioQueueInfo::from_raw(0x1048);
    assert_eq!(info.queue_size(), 1);
    assert_eq!(info.block_size(), 0x048 * 4);
    assert_eq!(info.block_size(), 288);
    assert!(info.has_audio());

    let silent = AudioQueueInfo::from_raw(0x0FFF);
    assert_eq!(silent.queue_size(), 0);
    assert_eq!(silent.block_size(), 0xFFF * 4);
    assert!(!silent.has_audio());

    let full = AudioQueueInfo::from_raw(0xF000);
    assert_eq!(full.queue_size(), 15);
    assert_eq!(full.block_size(), 0);
}

#[test]
fn audio_queue_info_encode() {
    assert_eq!(AudioQueueInfo::encode(1, 288).unwrap().raw(), 0x1048);
    assert_eq!(AudioQueueInfo::encode(15, 0xFFF * 4).unwrap().raw(), 0xFFFF);
    assert!(matches!(AudioQueueInfo::encode(16, 0), Err(Error::InvalidData(_))));
    assert!(matches!(AudioQueueInfo::encode(1, 290), Err(Error::InvalidData(_))));
    assert!(matches!(AudioQueueInfo::encode(1, 0x1000 * 4), Err(Error::InvalidData(_))));
}
