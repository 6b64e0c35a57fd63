#![deny(unsafe_code)]
//! Module for inspecting TSVM/TVDOS MOV video containers.
//!
//! A MOV file is a fixed 32-byte [`Header`] followed by a stream of packets.
//! Each packet starts with a two-byte [`PacketTag`], but the container has no
//! uniform framing: depending on the tag the packet length comes from an
//! explicit size field, a rate lookup table, a fixed length, or a guess.
//! This crate resolves that framing and nothing more; payloads are skipped.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::ReadBytesExt;
use fallible_collections::TryReserveError;
use log::debug;

use std::io::{Read, Seek, SeekFrom};

mod header;
mod packet;
mod walker;

pub use crate::header::{AudioQueueInfo, Header, SIGNATURE, read_header};
pub use crate::packet::{
    BackgroundColor, ImageKind, MP2_EXTENDED_RATE_GUESS, MP2_FRAME_SIZES, Packet, PacketKind, PacketTag,
    Resolution, resolve_packet,
};
pub use crate::walker::{PacketWalker, ScanEnd, SizeFailure, WalkState};

pub use enough::{Stop, StopReason, Unstoppable};

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

/// Describes parser failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own parser error states and those of crates we use.
#[derive(Debug)]
pub enum Error {
    /// Fewer than [`Header::SIZE`] bytes were available at the start of the stream.
    TruncatedHeader,
    /// The signature did not match and the caller asked for strict checking.
    InvalidSignature([u8; 8]),
    /// The explicit length field of an image packet could not be read.
    UnreadableSize {
        /// Offset of the packet tag.
        offset: u64,
    },
    /// An unknown packet had no plausible length field.
    UnresolvableSize {
        /// Offset of the packet tag.
        offset: u64,
        /// The candidate length, if four bytes could be read at all.
        candidate: Option<u32>,
    },
    /// Parse error caused by corrupt or out-of-range values.
    InvalidData(&'static str),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Operation was stopped/cancelled
    Stopped(enough::StopReason),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::TruncatedHeader => "truncated header",
            Self::InvalidSignature(sig) => return write!(f, "invalid signature {sig:02X?}"),
            Self::UnreadableSize { offset } => {
                return write!(f, "could not read packet size at offset {offset:#x}");
            },
            Self::UnresolvableSize { offset, candidate: Some(size) } => {
                return write!(f, "implausible packet size {size} at offset {offset:#x}");
            },
            Self::UnresolvableSize { offset, candidate: None } => {
                return write!(f, "cannot determine packet size at offset {offset:#x}");
            },
            Self::InvalidData(s) => s,
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
            Self::Stopped(reason) => return write!(f, "Stopped: {}", reason),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) | Error::InvalidSignature(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF | Error::TruncatedHeader => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<enough::StopReason> for Error {
    fn from(reason: enough::StopReason) -> Self {
        Self::Stopped(reason)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Configuration for scanning MOV packet streams
///
/// The packet stream has no uniform framing, so a damaged or misidentified
/// file can make the walker produce garbage sizes. These bounds keep an
/// exploratory scan finite.
///
/// # Examples
///
/// ```rust
/// use tsvm_mov_parse::ScanConfig;
///
/// // Default: stop after 50 packets, reject unknown sizes >= 1,000,000
/// let config = ScanConfig::default();
///
/// // Walk the whole file
/// let config = ScanConfig::default().with_max_packets(None);
///
/// // Refuse files that do not carry the MOV signature
/// let config = ScanConfig::default().require_signature(true);
/// ```
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum number of packets emitted before the scan stops with
    /// [`ScanEnd::Truncated`].
    /// Default: 50 packets
    pub max_packets: Option<u32>,

    /// Exclusive upper bound for the guessed payload length of a packet
    /// with an unrecognized tag.
    /// Default: 1,000,000 bytes
    pub unknown_size_limit: u32,

    /// Fail with [`Error::InvalidSignature`] instead of warning.
    /// Default: false
    pub require_signature: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_packets: Some(50),
            unknown_size_limit: 1_000_000,
            require_signature: false,
        }
    }
}

impl ScanConfig {
    /// Create a configuration without a packet cap.
    ///
    /// The unknown-size bound stays at its default.
    pub fn unlimited() -> Self {
        Self {
            max_packets: None,
            ..Self::default()
        }
    }

    /// Set the packet cap (`None` walks to the end of the stream)
    pub fn with_max_packets(mut self, packets: Option<u32>) -> Self {
        self.max_packets = packets;
        self
    }

    /// Set the exclusive bound for guessed sizes of unknown packets
    pub fn with_unknown_size_limit(mut self, bytes: u32) -> Self {
        self.unknown_size_limit = bytes;
        self
    }

    /// Enable strict signature checking
    pub fn require_signature(mut self, require: bool) -> Self {
        self.require_signature = require;
        self
    }
}

/// Everything learned about a MOV stream by [`read_mov`].
#[derive(Debug)]
pub struct MovAnalysis {
    /// The decoded 32-byte header.
    pub header: Header,
    /// Whether `header.signature` equals [`SIGNATURE`].
    pub signature_ok: bool,
    /// Packets in stream order, up to the stop point.
    pub packets: TryVec<Packet>,
    /// Why the packet scan ended.
    pub end: ScanEnd,
    /// Total length of the underlying stream in bytes.
    pub stream_len: u64,
}

impl MovAnalysis {
    /// True if the scan stopped because the framing could not be resolved.
    pub fn is_desynchronized(&self) -> bool {
        matches!(self.end, ScanEnd::ResolutionFailed(_))
    }
}

/// Read a MOV stream with the default [`ScanConfig`].
pub fn read_mov<T: Read + Seek>(f: &mut T) -> Result<MovAnalysis> {
    read_mov_with_config(f, &ScanConfig::default(), &Unstoppable)
}

/// Decode the header and walk the packet stream.
///
/// The stream must be positioned at the start of the file. Resolution
/// failures are not errors here: they end the scan and are reported in
/// [`MovAnalysis::end`], with every packet before them kept.
///
/// # Arguments
///
/// * `f` - Reader for the MOV file
/// * `config` - Scan bounds and signature policy
/// * `stop` - Cancellation token (use [`Unstoppable`] if not needed)
pub fn read_mov_with_config<T: Read + Seek>(
    f: &mut T,
    config: &ScanConfig,
    stop: &dyn Stop,
) -> Result<MovAnalysis> {
    let header = read_header(f)?;
    let signature_ok = header.signature_matches();
    if !signature_ok && config.require_signature {
        return Err(Error::InvalidSignature(header.signature));
    }

    let mut packets = TryVec::new();
    let end = {
        let mut walker = PacketWalker::with_config(&mut *f, Header::SIZE, config, stop);
        while let Some(packet) = walker.next_packet()? {
            packets.push(packet)?;
        }
        walker.end().unwrap_or(ScanEnd::Aborted)
    };

    let stream_len = f.seek(SeekFrom::End(0))?;
    debug!("scanned {} packets, {:?}, stream length {}", packets.len(), end, stream_len);

    Ok(MovAnalysis {
        header,
        signature_ok,
        packets,
        end,
        stream_len,
    })
}

/// Fill `buf` from `src` until it is full or the source is exhausted.
///
/// Returns the number of bytes read. Unlike `read_exact`, a short count is
/// not an error, and the count tells how far the source moved.
fn read_up_to<T: Read>(src: &mut T, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Skip a number of bytes that we don't care to parse.
///
/// Seeking past the end is allowed; the next read then sees end of stream.
fn skip<T: Seek>(src: &mut T, bytes: u64) -> Result<()> {
    let bytes = i64::try_from(bytes).map_err(|_| Error::InvalidData("skip length overflow"))?;
    src.seek(SeekFrom::Current(bytes))?;
    Ok(())
}

fn le_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::LittleEndian>().map_err(From::from)
}

fn le_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::LittleEndian>().map_err(From::from)
}

#[test]
fn read_up_to_short_source() {
    let mut src = &b"abc"[..];
    let mut buf = [0u8; 4];
    assert_eq!(read_up_to(&mut src, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
}

#[test]
fn skip_past_end_is_not_an_error() {
    let mut src = std::io::Cursor::new(vec![0u8; 4]);
    skip(&mut src, 100).unwrap();
    assert_eq!(src.position(), 100);
    let mut buf = [0u8; 2];
    assert_eq!(read_up_to(&mut src, &mut buf).unwrap(), 0);
}

#[test]
fn config_builders() {
    let config = ScanConfig::default();
    assert_eq!(config.max_packets, Some(50));
    assert_eq!(config.unknown_size_limit, 1_000_000);
    assert!(!config.require_signature);

    let config = ScanConfig::unlimited().with_unknown_size_limit(10).require_signature(true);
    assert_eq!(config.max_packets, None);
    assert_eq!(config.unknown_size_limit, 10);
    assert!(config.require_signature);
}
