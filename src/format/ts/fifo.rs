//! Reassembly of elementary stream units for one selected stream.

use crate::av::{AccessUnit, StreamKind, StreamType};
use bytes::BytesMut;
use log::{debug, warn};
use std::collections::VecDeque;

const INITIAL_CAPACITY: usize = 4096;

/// Accumulates the payload of the selected PID of one kind and queues the
/// sealed units until the caller pulls them.
///
/// A unit opens at a PES start and is sealed by the next start, by reaching
/// its declared size or by [`flush`](Self::flush) at end of stream. Data
/// arriving with no open unit (after a seek or a lost start) opens a
/// *broken* unit, which is dropped when sealed unless `keep_broken` is set.
#[derive(Debug)]
pub struct OutputFifo {
    kind: StreamKind,
    pid: Option<u16>,
    stream_type: StreamType,
    buffer: BytesMut,
    pts: f64,
    position: u64,
    open: bool,
    broken: bool,
    /// Declared payload size of the open unit, 0 when unbounded.
    expected: usize,
    ready: VecDeque<AccessUnit>,
    keep_broken: bool,
    max_queued: usize,
    pub broken_dropped: u64,
    pub queue_dropped: u64,
}

impl OutputFifo {
    pub fn new(kind: StreamKind, keep_broken: bool, max_queued: usize) -> Self {
        Self {
            kind,
            pid: None,
            stream_type: StreamType::Unknown,
            buffer: BytesMut::new(),
            pts: 0.0,
            position: 0,
            open: false,
            broken: false,
            expected: 0,
            ready: VecDeque::new(),
            keep_broken,
            max_queued: max_queued.max(1),
            broken_dropped: 0,
            queue_dropped: 0,
        }
    }

    pub fn pid(&self) -> Option<u16> {
        self.pid
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Points the fifo at another PID, discarding everything buffered.
    pub fn select(&mut self, pid: Option<u16>, stream_type: StreamType) {
        self.reset();
        self.pid = pid;
        self.stream_type = stream_type;
    }

    pub fn set_stream_type(&mut self, stream_type: StreamType) {
        self.stream_type = stream_type;
    }

    /// Seals any open unit and opens a new one at a PES start.
    pub fn start_unit(&mut self, payload: &[u8], payload_size: usize, pts: f64, position: u64) {
        self.seal();
        self.open = true;
        self.broken = false;
        self.pts = pts;
        self.position = position;
        self.expected = payload_size;
        self.append(payload);
    }

    /// Appends continuation data. `pts` and `position` are used only if this
    /// opens a broken unit.
    pub fn continue_unit(&mut self, payload: &[u8], pts: f64, position: u64) {
        if payload.is_empty() {
            return;
        }
        if !self.open {
            self.open = true;
            self.broken = true;
            self.pts = pts;
            self.position = position;
            self.expected = 0;
        }
        self.append(payload);
    }

    /// Seals the open unit after a PES start that could not be parsed.
    /// The data that follows belongs to a unit without a usable header, so
    /// it collects into a broken unit.
    pub fn lose_start(&mut self, pts: f64, position: u64) {
        self.seal();
        self.open = true;
        self.broken = true;
        self.pts = pts;
        self.position = position;
        self.expected = 0;
    }

    /// Flags the open unit as missing data, after a resync.
    pub fn mark_broken(&mut self) {
        if self.open && !self.broken {
            debug!("{:?}: unit at {} lost data", self.kind, self.position);
            self.broken = true;
        }
    }

    fn append(&mut self, payload: &[u8]) {
        let take = if self.expected > 0 {
            payload.len().min(self.expected.saturating_sub(self.buffer.len()))
        } else {
            payload.len()
        };

        let spare = self.buffer.capacity() - self.buffer.len();
        if spare < take {
            // grow geometrically
            let grow = take.max(self.buffer.capacity()).max(INITIAL_CAPACITY);
            self.buffer.reserve(grow);
        }
        self.buffer.extend_from_slice(&payload[..take]);

        if self.expected > 0 && self.buffer.len() >= self.expected {
            self.seal();
        }
    }

    /// Closes the open unit and queues it.
    pub fn seal(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.expected = 0;
        if self.buffer.is_empty() {
            return;
        }

        let data = self.buffer.split().freeze();
        if self.broken && !self.keep_broken {
            self.broken_dropped += 1;
            debug!(
                "{:?}: dropping broken unit of {} bytes at {}",
                self.kind,
                data.len(),
                self.position
            );
            return;
        }

        let unit = AccessUnit::new(data)
            .with_pts(self.pts)
            .with_position(self.position)
            .with_stream(self.pid.unwrap_or_default(), self.stream_type)
            .with_broken_flag(self.broken);

        if self.ready.len() >= self.max_queued {
            self.ready.pop_front();
            self.queue_dropped += 1;
            warn!("{:?}: ready queue full, dropping oldest unit", self.kind);
        }
        self.ready.push_back(unit);
    }

    /// Seals what is left at end of stream.
    pub fn flush(&mut self) {
        self.seal();
    }

    pub fn pop(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.ready.len()
    }

    /// Drops the open unit and every queued unit. The next continuation
    /// opens a broken unit.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.open = false;
        self.broken = false;
        self.expected = 0;
        self.ready.clear();
    }
}
