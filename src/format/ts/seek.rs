//! Index-free seeking: byte offset estimation, sync re-acquisition and
//! alignment on the next video keyframe.

use super::demuxer::{Dispatch, TSDemuxer};
use super::sync::resync;
use super::types::*;
use crate::av::StreamType;
use crate::error::{DemuxError, Result, SeekError};
use crate::format::{PacketSource, SeekTarget};
use log::debug;

/// Clock span needed before a rate is trusted.
const MIN_SPAN_SECONDS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    seconds: f64,
    position: u64,
}

/// First and last clock sample of an uninterrupted run.
#[derive(Debug, Clone, Default, PartialEq)]
struct Span {
    first: Option<Sample>,
    last: Option<Sample>,
}

impl Span {
    fn add(&mut self, seconds: f64, position: u64, restart: bool) {
        let sample = Sample { seconds, position };
        let backwards = self
            .last
            .or(self.first)
            .is_some_and(|last| seconds < last.seconds || position < last.position);

        if self.first.is_none() || restart || backwards {
            self.first = Some(sample);
            self.last = None;
        } else {
            self.last = Some(sample);
        }
    }

    fn bytes_per_second(&self) -> Option<f64> {
        let (first, last) = (self.first?, self.last?);
        let elapsed = last.seconds - first.seconds;
        if elapsed < MIN_SPAN_SECONDS {
            return None;
        }
        Some((last.position - first.position) as f64 / elapsed)
    }
}

/// Byte rate of the stream measured against its clocks.
///
/// PCR samples of one PID are preferred; PTS samples of the first PID that
/// carried one are the fallback. Each run restarts when the clock or the
/// byte position goes backwards (wrap, discontinuity, seek).
#[derive(Debug, Clone, Default)]
pub struct BitrateEstimator {
    pcr_pid: Option<u16>,
    pcr: Span,
    pts_pid: Option<u16>,
    pts: Span,
}

impl BitrateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts PCR sampling to the PCR PID of the selected program.
    pub fn set_pcr_pid(&mut self, pid: u16) {
        if self.pcr_pid != Some(pid) {
            self.pcr_pid = Some(pid);
            self.pcr = Span::default();
        }
    }

    pub fn add_pcr(&mut self, pid: u16, pcr: u64, position: u64, discontinuity: bool) {
        if *self.pcr_pid.get_or_insert(pid) != pid {
            return;
        }
        self.pcr.add(pcr_to_seconds(pcr), position, discontinuity);
    }

    pub fn add_pts(&mut self, pid: u16, pts: f64, position: u64) {
        if *self.pts_pid.get_or_insert(pid) != pid {
            return;
        }
        self.pts.add(pts, position, false);
    }

    pub fn bytes_per_second(&self) -> Option<f64> {
        self.pcr.bytes_per_second().or_else(|| self.pts.bytes_per_second())
    }
}

/// Start codes in `data` as `(code, following byte)`.
fn start_codes(data: &[u8]) -> impl Iterator<Item = (u8, Option<u8>)> + '_ {
    data.windows(3)
        .enumerate()
        .filter(|(_, w)| *w == [0x00, 0x00, 0x01])
        .filter_map(move |(i, _)| data.get(i + 3).map(|&code| (code, data.get(i + 4).copied())))
}

/// True when a PES payload of `stream_type` starts decodable video.
pub fn is_keyframe(stream_type: StreamType, payload: &[u8]) -> bool {
    start_codes(payload).any(|(code, next)| match stream_type {
        // sequence header, GOP
        StreamType::VideoMpeg1 | StreamType::VideoMpeg2 => code == 0xb3 || code == 0xb8,
        // visual object sequence, or a VOP coded as I
        StreamType::VideoMpeg4 => code == 0xb0 || (code == 0xb6 && next.is_some_and(|b| b >> 6 == 0)),
        // SPS, IDR slice
        StreamType::VideoH264 => matches!(code & 0x1f, 5 | 7),
        _ => false,
    })
}

impl<S: PacketSource> TSDemuxer<S> {
    /// Repositions the demuxer.
    ///
    /// `Fraction` measures the stream length, `Seconds` uses the estimated
    /// bitrate. Relative targets count from the current position. When a
    /// video stream is selected the demuxer then skips ahead to the next
    /// keyframe; hitting end of stream first is not an error, the next
    /// [`next_unit`](Self::next_unit) simply returns `None`.
    pub fn seek(&mut self, target: SeekTarget, absolute: bool) -> Result<()> {
        let size = self.source.size();
        let base = (if absolute {
            self.movie_start
        } else {
            self.source.tell()
        }) as f64;

        let estimate = match target {
            SeekTarget::Fraction(fraction) => {
                if !fraction.is_finite() {
                    return Err(SeekError::OutOfRange(fraction).into());
                }
                let end = size.ok_or(SeekError::NotSeekable)?;
                base + fraction * end.saturating_sub(self.movie_start) as f64
            }
            SeekTarget::Seconds(seconds) => {
                if !seconds.is_finite() {
                    return Err(SeekError::OutOfRange(seconds).into());
                }
                let rate = self.bitrate().ok_or(SeekError::NotSeekable)?;
                base + rate * seconds
            }
        };

        let mut offset = estimate.max(self.movie_start as f64) as u64;
        if let Some(end) = size {
            offset = offset.min(end);
        }
        let chunk = self.source.chunk_size().max(1) as u64;
        let offset = (offset / chunk * chunk).max(self.movie_start);
        debug!("seek {:?} (absolute: {}) -> byte {}", target, absolute, offset);

        self.reset_position_state();
        self.source.seek(offset)?;
        if !self.acquire_sync()? {
            self.eof = true;
            return Ok(());
        }

        if let Some(video_pid) = self.video.pid() {
            if !self.seek_keyframe(video_pid)? {
                debug!("no keyframe before end of stream");
                self.eof = true;
            }
        }
        Ok(())
    }

    /// Forgets everything tied to the old read position.
    pub(super) fn reset_position_state(&mut self) {
        self.video.reset();
        self.audio.reset();
        self.registry.reset_for_seek();
        for buffer in self.sections.values_mut() {
            buffer.reset();
        }
        self.eof = false;
    }

    /// Finds a sync byte that is followed by two more at packet distance
    /// (fewer at the end of the stream) and leaves the source on it.
    /// Returns `false` at end of stream.
    fn acquire_sync(&mut self) -> Result<bool> {
        let len = self.packet_size.len();
        let start = self.source.tell();
        let mut buf = vec![0u8; 2 * len + 1];

        loop {
            let scanned = (self.source.tell() - start) as usize;
            let budget = self.config.max_sync_scan.saturating_sub(scanned);
            match resync(&mut self.source, budget) {
                Ok(()) => {}
                Err(DemuxError::Eof) => return Ok(false),
                Err(e) => return Err(e),
            }

            let pos = self.source.tell();
            let n = self.source.read_full(&mut buf)?;
            if n < TS_PACKET_SIZE {
                return Ok(false);
            }
            let aligned = (1..=2).all(|i| i * len >= n || buf[i * len] == TS_SYNC_BYTE);
            if aligned {
                self.source.seek(pos)?;
                return Ok(true);
            }
            self.source.seek(pos + 1)?;
        }
    }

    /// Scans forward for a PES start of `video_pid` carrying a keyframe and
    /// rewinds to its packet. Returns `false` at end of stream.
    fn seek_keyframe(&mut self, video_pid: u16) -> Result<bool> {
        let mut buf = [0u8; TS_PACKET_SIZE];
        while let Some(position) = self.read_packet(&mut buf)? {
            let Some(start) = self.dispatch(&buf, position, Dispatch::Scan) else {
                continue;
            };
            if start.pid == video_pid && start.keyframe {
                debug!("keyframe at byte {} (pts {:.3})", position, start.pts);
                self.source.seek(position)?;
                self.registry.reset_for_seek();
                for buffer in self.sections.values_mut() {
                    buffer.reset();
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}
