//! Sequential packet scanner.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use enough::{Stop, Unstoppable};
use log::{debug, trace, warn};

use std::io::{Read, Seek, SeekFrom};

use crate::packet::{Packet, PacketTag, resolve_packet};
use crate::{Error, Result, ScanConfig, read_up_to};

/// Which size rule gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFailure {
    /// An image packet's length field was cut off.
    Unreadable,
    /// An unknown packet had no usable length.
    Unresolvable { candidate: Option<u32> },
}

/// Why a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Fewer than two bytes were left where a tag was expected.
    EndOfStream,
    /// The packet cap was reached with more packets remaining.
    Truncated,
    /// A packet could not be sized; everything after it is unknown.
    ResolutionFailed(SizeFailure),
    /// The scan was cancelled or the source returned an I/O error.
    Aborted,
}

impl ScanEnd {
    /// `EndOfStream` and `Truncated` are ordinary outcomes.
    pub fn is_error(self) -> bool {
        matches!(self, Self::ResolutionFailed(_) | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Scanning,
    Stopped(ScanEnd),
}

/// Lazily walks the packets of a MOV stream.
///
/// The walker reads a tag, hands the stream to [`resolve_packet`], and
/// emits a [`Packet`] once the size is known. It owns the cursor for its
/// lifetime: nothing else may move `src` between packets.
///
/// Resolution failures end the walk without an error; check
/// [`PacketWalker::state`] once [`PacketWalker::next_packet`] returns
/// `Ok(None)`. I/O errors and cancellation are returned as `Err` and
/// leave the walker in `Stopped(Aborted)`.
pub struct PacketWalker<'a, R> {
    src: &'a mut R,
    start: u64,
    position: u64,
    emitted: u64,
    state: WalkState,
    config: ScanConfig,
    stop: &'a dyn Stop,
}

impl<'a, R: Read + Seek> PacketWalker<'a, R> {
    /// Walk `src` with the default [`ScanConfig`].
    ///
    /// `src` must be positioned at `start`, the stream offset of the first
    /// packet (normally [`Header::SIZE`](crate::Header::SIZE)).
    pub fn new(src: &'a mut R, start: u64) -> Self {
        Self::with_config(src, start, &ScanConfig::default(), &Unstoppable)
    }

    pub fn with_config(src: &'a mut R, start: u64, config: &ScanConfig, stop: &'a dyn Stop) -> Self {
        Self {
            src,
            start,
            position: start,
            emitted: 0,
            state: WalkState::Scanning,
            config: config.clone(),
            stop,
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    /// The stop reason, or `None` while still scanning.
    pub fn end(&self) -> Option<ScanEnd> {
        match self.state {
            WalkState::Scanning => None,
            WalkState::Stopped(end) => Some(end),
        }
    }

    /// Stream offset where the next tag is expected.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn packets_emitted(&self) -> u64 {
        self.emitted
    }

    /// Seek back to the first packet and start over.
    pub fn rewind(&mut self) -> Result<()> {
        self.src.seek(SeekFrom::Start(self.start))?;
        self.position = self.start;
        self.emitted = 0;
        self.state = WalkState::Scanning;
        Ok(())
    }

    /// Decode the next packet.
    ///
    /// Returns `Ok(None)` once the walker has stopped, for any reason.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if let WalkState::Stopped(_) = self.state {
            return Ok(None);
        }
        match self.step() {
            Ok(packet) => Ok(packet),
            Err(e) => {
                debug!("scan aborted at {:#x}: {e}", self.position);
                self.state = WalkState::Stopped(ScanEnd::Aborted);
                Err(e)
            },
        }
    }

    fn step(&mut self) -> Result<Option<Packet>> {
        self.stop.check()?;

        let offset = self.position;
        let mut tag = [0u8; 2];
        let n = read_up_to(&mut *self.src, &mut tag)?;
        if n < tag.len() {
            return Ok(self.finish(ScanEnd::EndOfStream));
        }
        if self.config.max_packets.is_some_and(|max| self.emitted >= u64::from(max)) {
            // leave the cursor on the first packet not emitted
            self.src.seek(SeekFrom::Current(-2))?;
            return Ok(self.finish(ScanEnd::Truncated));
        }

        let tag = PacketTag(tag);
        let resolution = match resolve_packet(&mut *self.src, tag, offset, &self.config) {
            Ok(r) => r,
            Err(Error::UnreadableSize { .. }) => {
                warn!("could not read size of packet {} {tag} at {offset:#x}, stopping", self.emitted);
                return Ok(self.finish(ScanEnd::ResolutionFailed(SizeFailure::Unreadable)));
            },
            Err(Error::UnresolvableSize { candidate, .. }) => {
                warn!("cannot determine size of packet {} {tag} at {offset:#x}, stopping", self.emitted);
                return Ok(self.finish(ScanEnd::ResolutionFailed(SizeFailure::Unresolvable { candidate })));
            },
            Err(e) => return Err(e),
        };

        let packet = Packet {
            offset,
            tag,
            kind: resolution.kind,
            size: 2 + resolution.additional,
        };
        trace!("packet {} @ {offset:#x}: {tag} ({}) {} bytes", self.emitted, packet.kind, packet.size);
        self.position = packet.end();
        self.emitted += 1;
        Ok(Some(packet))
    }

    fn finish(&mut self, end: ScanEnd) -> Option<Packet> {
        debug!("scan stopped after {} packets: {end:?}", self.emitted);
        self.state = WalkState::Stopped(end);
        None
    }
}

impl<R: Read + Seek> Iterator for PacketWalker<'_, R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

impl<R: Read + Seek> std::iter::FusedIterator for PacketWalker<'_, R> {}

#[cfg(test)]
fn collect(data: &[u8], config: &ScanConfig) -> (Vec<Packet>, ScanEnd, u64) {
    let mut src = std::io::Cursor::new(data.to_vec());
    let mut walker = PacketWalker::with_config(&mut src, 0, config, &Unstoppable);
    let packets = walker.by_ref().map(|p| p.unwrap()).collect();
    let end = walker.end().unwrap();
    drop(walker);
    (packets, end, src.position())
}

#[test]
fn walk_mixed_stream() {
    let mut data = vec![0xFF, 0xFF];
    data.extend_from_slice(&[0xFF, 0xFE, 1, 2, 3, 4]);
    data.extend_from_slice(&[0x04, 0x01]);
    data.extend_from_slice(&3u32.to_le_bytes());
    data.extend_from_slice(&[9, 9, 9]);
    data.extend_from_slice(&[0x02, 0x11]);
    data.extend_from_slice(&[0u8; 216]);

    let (packets, end, _) = collect(&data, &ScanConfig::default());
    assert_eq!(end, ScanEnd::EndOfStream);
    let sizes: Vec<_> = packets.iter().map(|p| (p.offset, p.size)).collect();
    assert_eq!(sizes, [(0, 2), (2, 6), (8, 9), (17, 218)]);
    assert_eq!(packets.last().unwrap().end(), data.len() as u64);
}

#[test]
fn cap_truncates_and_keeps_cursor() {
    let data = [0xFFu8; 51 * 2];
    let (packets, end, pos) = collect(&data, &ScanConfig::default());
    assert_eq!(packets.len(), 50);
    assert_eq!(end, ScanEnd::Truncated);
    assert_eq!(pos, 100);
}

#[test]
fn cap_on_exact_end_is_end_of_stream() {
    let data = [0xFFu8; 50 * 2];
    let (packets, end, _) = collect(&data, &ScanConfig::default());
    assert_eq!(packets.len(), 50);
    assert_eq!(end, ScanEnd::EndOfStream);
}

#[test]
fn unlimited_walks_everything() {
    let data = [0xFFu8; 200 * 2];
    let (packets, end, _) = collect(&data, &ScanConfig::unlimited());
    assert_eq!(packets.len(), 200);
    assert_eq!(end, ScanEnd::EndOfStream);
}

#[test]
fn trailing_odd_byte_is_end_of_stream() {
    let (packets, end, _) = collect(&[0xFF, 0xFF, 0x42], &ScanConfig::default());
    assert_eq!(packets.len(), 1);
    assert_eq!(end, ScanEnd::EndOfStream);
    assert!(!end.is_error());
}

#[test]
fn empty_stream() {
    let (packets, end, _) = collect(&[], &ScanConfig::default());
    assert!(packets.is_empty());
    assert_eq!(end, ScanEnd::EndOfStream);
}

#[test]
fn unresolvable_stops_scan() {
    let mut data = vec![0xFF, 0xFF, 0x30, 0x31];
    data.extend_from_slice(&2_000_000u32.to_le_bytes());
    data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
    let (packets, end, _) = collect(&data, &ScanConfig::default());
    assert_eq!(packets.len(), 1);
    assert_eq!(
        end,
        ScanEnd::ResolutionFailed(SizeFailure::Unresolvable { candidate: Some(2_000_000) })
    );
    assert!(end.is_error());
}

#[test]
fn unreadable_image_size_stops_scan() {
    let (packets, end, _) = collect(&[0xFF, 0xFF, 0x04, 0x00, 0x01], &ScanConfig::default());
    assert_eq!(packets.len(), 1);
    assert_eq!(end, ScanEnd::ResolutionFailed(SizeFailure::Unreadable));
}

#[test]
fn oversized_skip_ends_cleanly() {
    let mut data = vec![0x04, 0x00];
    data.extend_from_slice(&500u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 10]);
    let (packets, end, _) = collect(&data, &ScanConfig::default());
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].size, 506);
    assert_eq!(end, ScanEnd::EndOfStream);
}

#[test]
fn rewind_replays() {
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x11]);
    data.extend_from_slice(&[0u8; 144]);
    let mut src = std::io::Cursor::new(data);
    src.set_position(4);
    let mut walker = PacketWalker::new(&mut src, 4);
    let first: Vec<_> = walker.by_ref().map(|p| p.unwrap()).collect();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].offset, 4);
    assert!(walker.next_packet().unwrap().is_none());

    walker.rewind().unwrap();
    assert_eq!(walker.state(), WalkState::Scanning);
    assert_eq!(walker.position(), 4);
    let second: Vec<_> = walker.by_ref().map(|p| p.unwrap()).collect();
    assert_eq!(first, second);
    assert_eq!(walker.packets_emitted(), 2);
}

#[test]
fn cancellation_aborts() {
    struct Cancelled;
    impl Stop for Cancelled {
        fn check(&self) -> std::result::Result<(), enough::StopReason> {
            Err(enough::StopReason::Cancelled)
        }
    }

    let mut src = std::io::Cursor::new(vec![0xFFu8, 0xFF]);
    let mut walker = PacketWalker::with_config(&mut src, 0, &ScanConfig::default(), &Cancelled);
    assert!(matches!(walker.next(), Some(Err(Error::Stopped(_)))));
    assert_eq!(walker.end(), Some(ScanEnd::Aborted));
    assert!(walker.next().is_none());
}

#[cfg(test)]
struct FailAfter {
    inner: std::io::Cursor<Vec<u8>>,
    fail_at: u64,
}

#[cfg(test)]
impl Read for FailAfter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.inner.position();
        if pos >= self.fail_at {
            return Err(std::io::Error::other("disk"));
        }
        let len = buf.len().min((self.fail_at - pos) as usize);
        self.inner.read(&mut buf[..len])
    }
}

#[cfg(test)]
impl Seek for FailAfter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[test]
fn io_error_aborts() {
    let mut data = vec![0xFF, 0xFF, 0x04, 0x00];
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 8]);
    let mut src = FailAfter { inner: std::io::Cursor::new(data), fail_at: 5 };
    let mut walker = PacketWalker::new(&mut src, 0);
    assert!(walker.next_packet().unwrap().is_some());
    assert!(matches!(walker.next_packet(), Err(Error::Io(_))));
    assert_eq!(walker.end(), Some(ScanEnd::Aborted));
    assert!(walker.next_packet().unwrap().is_none());
    assert_eq!(walker.packets_emitted(), 1);
}

#[test]
fn packet_count_past_u32() {
    let mut src = std::io::Cursor::new(vec![0xFFu8; 4]);
    let mut walker = PacketWalker::with_config(&mut src, 0, &ScanConfig::unlimited(), &Unstoppable);
    walker.emitted = u64::from(u32::MAX);
    assert!(walker.next_packet().unwrap().is_some());
    assert!(walker.next_packet().unwrap().is_some());
    assert_eq!(walker.packets_emitted(), u64::from(u32::MAX) + 2);
}
