//! Per-PID bookkeeping for every stream seen in the multiplex.

use crate::av::StreamType;
use log::{debug, trace};
use std::collections::HashMap;

/// Start of a PES header whose remainder is still in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingHeader {
    pub bytes: Vec<u8>,
    /// Offset of the unit-start packet.
    pub position: u64,
    pub random_access: bool,
}

/// State of one elementary stream PID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementaryStreamState {
    pub pid: u16,
    /// Type learned from the first classified PES, or the PMT declaration.
    pub stream_type: StreamType,
    /// Type announced by the PMT.
    pub declared_type: StreamType,
    /// Program whose PMT lists this PID.
    pub program: Option<u16>,
    /// `None` until the first packet carrying payload.
    pub last_cc: Option<u8>,
    /// PES payload bytes still expected for the current unit.
    pub payload_remaining: usize,
    pub last_pts: Option<f64>,
    pub prev_pts: Option<f64>,
    pub cc_good: u64,
    pub cc_bad: u64,
    pub pts_backward: u64,
    /// PES header split across packets.
    pub pending: Option<PendingHeader>,
}

impl ElementaryStreamState {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    /// Type to hand to the PES classifier: the learned type once known.
    pub fn effective_type(&self) -> StreamType {
        if self.stream_type == StreamType::Unknown {
            self.declared_type
        } else {
            self.stream_type
        }
    }
}

/// PID-indexed map of [`ElementaryStreamState`]. Entries live for the
/// whole session.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<u16, ElementaryStreamState>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `pid`, creating it on first sight.
    pub fn entry(&mut self, pid: u16) -> &mut ElementaryStreamState {
        self.streams
            .entry(pid)
            .or_insert_with(|| ElementaryStreamState::new(pid))
    }

    pub fn get(&self, pid: u16) -> Option<&ElementaryStreamState> {
        self.streams.get(&pid)
    }

    /// Records a PMT declaration for `pid`.
    pub fn declare(&mut self, pid: u16, program: u16, declared: StreamType) {
        let state = self.entry(pid);
        state.program = Some(program);
        state.declared_type = declared;
    }

    /// Sets the type from a classified PES. The first known type sticks.
    pub fn learn_type(&mut self, pid: u16, stream_type: StreamType) {
        let state = self.entry(pid);
        if state.stream_type == StreamType::Unknown && stream_type != StreamType::Unknown {
            debug!("pid 0x{:04x}: {}", pid, stream_type);
            state.stream_type = stream_type;
        }
    }

    /// Checks the continuity counter of a packet carrying payload.
    ///
    /// Returns `false` on a mismatch. Mismatches are counted, never acted
    /// on. A set discontinuity indicator restarts the sequence.
    pub fn check_continuity(&mut self, pid: u16, cc: u8, discontinuity: bool) -> bool {
        let state = self.entry(pid);
        let last_cc = state.last_cc;
        let ok = match last_cc {
            Some(last) if !discontinuity => {
                // a single repeated packet is legal
                cc == (last + 1) & 0x0f || cc == last
            }
            _ => true,
        };
        state.last_cc = Some(cc);
        if ok {
            state.cc_good += 1;
        } else {
            state.cc_bad += 1;
            trace!("pid 0x{:04x}: continuity counter {} after {:?}", pid, cc, last_cc);
        }
        ok
    }

    /// Records a PTS. Returns `false` when it went backwards.
    pub fn update_pts(&mut self, pid: u16, pts: f64) -> bool {
        let state = self.entry(pid);
        let forward = state.last_pts.map_or(true, |last| pts >= last);
        if !forward {
            state.pts_backward += 1;
            debug!(
                "pid 0x{:04x}: pts went backwards {:.3} -> {:.3}",
                pid,
                state.last_pts.unwrap_or_default(),
                pts
            );
        }
        state.prev_pts = state.last_pts;
        state.last_pts = Some(pts);
        forward
    }

    /// Drops per-position state after a reposition. Types and programs stay.
    pub fn reset_for_seek(&mut self) {
        for state in self.streams.values_mut() {
            state.last_cc = None;
            state.payload_remaining = 0;
            state.last_pts = None;
            state.prev_pts = None;
            state.pending = None;
        }
    }

    /// Forgets what a resync made stale. Timestamps stay for units without
    /// a PTS.
    pub fn reset_after_resync(&mut self) {
        for state in self.streams.values_mut() {
            state.last_cc = None;
            state.payload_remaining = 0;
            state.pending = None;
        }
    }

    /// Clears counters and timestamps gathered while probing.
    pub fn reset_after_probe(&mut self) {
        for state in self.streams.values_mut() {
            state.last_cc = None;
            state.payload_remaining = 0;
            state.last_pts = None;
            state.prev_pts = None;
            state.pending = None;
            state.cc_good = 0;
            state.cc_bad = 0;
            state.pts_backward = 0;
        }
    }

    /// First PID of `program` (or of any program when `None`) whose type
    /// satisfies `accept`, in ascending PID order.
    pub fn find(&self, program: Option<u16>, accept: impl Fn(StreamType) -> bool) -> Option<u16> {
        let mut pids: Vec<_> = self
            .streams
            .values()
            .filter(|s| program.is_none() || s.program == program)
            .filter(|s| accept(s.effective_type()))
            .map(|s| s.pid)
            .collect();
        pids.sort_unstable();
        pids.first().copied()
    }
}
