//! Packet size detection and sync byte acquisition.

use super::types::*;
use crate::error::{DemuxError, Result};
use crate::format::source::PacketSource;
use std::collections::HashMap;

/// Returns the packet size for which [`NUM_CONSECUTIVE_PACKETS`] packets in
/// a row start with the sync byte. 188 is tried before 204.
pub fn detect_packet_size(buf: &[u8]) -> Option<PacketSize> {
    find_sync(buf, buf.len()).map(|(size, _)| size)
}

/// Like [`detect_packet_size`] but also returns the offset of the first
/// aligned sync byte, searching at most `max_scan` leading bytes.
pub fn find_sync(buf: &[u8], max_scan: usize) -> Option<(PacketSize, usize)> {
    [PacketSize::Standard, PacketSize::Fec]
        .into_iter()
        .find_map(|size| find_aligned(buf, size.len(), max_scan).map(|offset| (size, offset)))
}

fn find_aligned(buf: &[u8], packet_len: usize, max_scan: usize) -> Option<usize> {
    let span = (NUM_CONSECUTIVE_PACKETS - 1) * packet_len;
    let last_start = buf.len().checked_sub(span + 1)?;
    (0..=last_start.min(max_scan)).find(|&offset| {
        (0..NUM_CONSECUTIVE_PACKETS).all(|i| buf[offset + i * packet_len] == TS_SYNC_BYTE)
    })
}

/// Scans forward byte by byte until the next sync byte and leaves the source
/// positioned on it.
pub fn resync<S: PacketSource>(source: &mut S, max_scan: usize) -> Result<()> {
    let mut byte = [0u8; 1];
    for _ in 0..max_scan {
        if source.read(&mut byte)? == 0 {
            return Err(DemuxError::Eof);
        }
        if byte[0] == TS_SYNC_BYTE {
            let pos = source.tell() - 1;
            source.seek(pos)?;
            return Ok(());
        }
    }
    Err(DemuxError::SyncLost(max_scan))
}

/// Continuity counter plausibility over a sample of packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuityScore {
    pub good: u32,
    pub bad: u32,
}

impl ContinuityScore {
    /// `good / (good + bad)`, 1.0 when nothing was scored.
    pub fn ratio(&self) -> f64 {
        let total = self.good + self.bad;
        if total == 0 {
            1.0
        } else {
            self.good as f64 / total as f64
        }
    }
}

/// Scores consecutive packets from `offset`. Only a quality signal: streams
/// with PID holes or duplicate packets still demux.
pub fn score_continuity(buf: &[u8], offset: usize, size: PacketSize) -> ContinuityScore {
    let mut score = ContinuityScore::default();
    let mut last: HashMap<u16, u8> = HashMap::new();

    for packet in buf.get(offset..).unwrap_or(&[]).chunks_exact(size.len()) {
        if packet[0] != TS_SYNC_BYTE {
            break;
        }
        let pid = ((packet[1] as u16 & 0x1f) << 8) | packet[2] as u16;
        if pid == PID_NULL || packet[3] & 0x10 == 0 {
            continue;
        }
        let cc = packet[3] & 0x0f;
        if let Some(prev) = last.insert(pid, cc) {
            if cc == (prev + 1) & 0x0f {
                score.good += 1;
            } else {
                score.bad += 1;
            }
        }
    }
    score
}
