use super::fifo::OutputFifo;
use super::parser::TSPacketParser;
use super::pes::{header_incomplete, parse_pes};
use super::psi::{parse_pat, parse_pmt, verify_crc};
use super::registry::{ElementaryStreamState, PendingHeader, StreamRegistry};
use super::section::SectionBuffer;
use super::seek::{is_keyframe, BitrateEstimator};
use super::sync::{find_sync, resync, score_continuity};
use super::types::*;
use crate::av::{AccessUnit, StreamKind, StreamType};
use crate::config::{DemuxConfig, PidRequest};
use crate::error::{DemuxError, Result};
use crate::format::{Demuxer as FormatDemuxer, PacketSource, SeekTarget};
use crate::utils::Crc32Mpeg2;
use log::{debug, info, trace, warn};
use std::collections::HashMap;

/// Counters for everything the demuxer tolerated instead of failing on.
///
/// Cleared once probing is over, so they describe playback only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub continuity_errors: u64,
    pub pts_backward: u64,
    pub sections_discarded: u64,
    pub crc_mismatches: u64,
    pub pes_errors: u64,
    pub malformed_packets: u64,
    pub transport_errors: u64,
    pub scrambled_packets: u64,
    pub broken_units_dropped: u64,
    pub queued_units_dropped: u64,
    pub resyncs: u64,
}

/// What a packet dispatch does with PES data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dispatch {
    /// Feed the fifos of the selected PIDs.
    Deliver,
    /// Report PES starts without touching the fifos (probing, keyframe search).
    Scan,
}

/// A PES start observed while scanning.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct PesStart {
    pub pid: u16,
    pub stream_type: StreamType,
    pub pts: f64,
    pub position: u64,
    pub keyframe: bool,
}

/// MPEG Transport Stream demuxer.
///
/// Pull based: every call to [`next_unit`](Self::next_unit) reads packets
/// from the source until a unit of the requested kind is complete. Units
/// of the other selected kind completed on the way are queued.
///
/// ```rust,no_run
/// use std::fs::File;
/// use std::io::BufReader;
/// use tsdemux::av::StreamKind;
/// use tsdemux::config::DemuxConfig;
/// use tsdemux::format::{IoSource, TSDemuxer};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = IoSource::new(BufReader::new(File::open("movie.ts")?))?;
/// let mut demuxer = TSDemuxer::open(source, DemuxConfig::new())?;
///
/// while let Some(unit) = demuxer.next_unit(StreamKind::Video)? {
///     println!("{:.3}s: {} bytes", unit.pts, unit.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct TSDemuxer<S: PacketSource> {
    pub(super) source: S,
    pub(super) config: DemuxConfig,
    parser: TSPacketParser,
    crc: Crc32Mpeg2,
    pub(super) packet_size: PacketSize,
    /// Offset of the first aligned packet.
    pub(super) movie_start: u64,
    pub(super) registry: StreamRegistry,
    pat: Option<PAT>,
    pub(super) pmts: HashMap<u16, PMT>,
    pub(super) sections: HashMap<u16, SectionBuffer>,
    pub(super) program: Option<u16>,
    pub(super) video: OutputFifo,
    pub(super) audio: OutputFifo,
    pub(super) bitrate: BitrateEstimator,
    pub(super) diagnostics: Diagnostics,
    pub(super) eof: bool,
}

impl<S: PacketSource> TSDemuxer<S> {
    /// Detects the packet size, then probes for the streams to deliver.
    ///
    /// The source is read from its current position.
    pub fn open(mut source: S, config: DemuxConfig) -> Result<Self> {
        let start = source.tell();
        let mut head = vec![0u8; config.max_sync_scan + NUM_CONSECUTIVE_PACKETS * TS_FEC_PACKET_SIZE];
        let n = source.read_full(&mut head)?;
        head.truncate(n);

        let (packet_size, offset) =
            find_sync(&head, config.max_sync_scan).ok_or(DemuxError::NotTransportStream)?;
        let score = score_continuity(&head, offset, packet_size);
        info!(
            "detected {} byte packets at offset {} (continuity {}/{})",
            packet_size.len(),
            start + offset as u64,
            score.good,
            score.good + score.bad
        );

        let movie_start = start + offset as u64;
        source.seek(movie_start)?;

        let program = config.program;
        let video = OutputFifo::new(StreamKind::Video, config.keep_broken, config.max_queued_units);
        let audio = OutputFifo::new(StreamKind::Audio, config.keep_broken, config.max_queued_units);
        let mut demuxer = Self {
            source,
            config,
            parser: TSPacketParser::new(),
            crc: Crc32Mpeg2::new(),
            packet_size,
            movie_start,
            registry: StreamRegistry::new(),
            pat: None,
            pmts: HashMap::new(),
            sections: HashMap::new(),
            program,
            video,
            audio,
            bitrate: BitrateEstimator::new(),
            diagnostics: Diagnostics::default(),
            eof: false,
        };
        demuxer.probe()?;
        Ok(demuxer)
    }

    /// Returns the next complete unit of `kind`, or `None` once the stream
    /// is exhausted (or the kind is not selected).
    pub fn next_unit(&mut self, kind: StreamKind) -> Result<Option<AccessUnit>> {
        if self.fifo(kind).pid().is_none() {
            return Ok(None);
        }

        let mut buf = [0u8; TS_PACKET_SIZE];
        loop {
            if let Some(unit) = self.fifo_mut(kind).pop() {
                trace!("{:?} unit: pts {:.3}, {} bytes", kind, unit.pts, unit.len());
                return Ok(Some(unit));
            }
            if self.eof {
                return Ok(None);
            }

            match self.read_packet(&mut buf) {
                Ok(Some(position)) => {
                    self.dispatch(&buf, position, Dispatch::Deliver);
                }
                Ok(None) | Err(DemuxError::Eof) => {
                    debug!("end of stream at {}", self.source.tell());
                    self.eof = true;
                    self.video.flush();
                    self.audio.flush();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Selected `(video, audio)` PIDs.
    pub fn selected_pids(&self) -> (Option<u16>, Option<u16>) {
        (self.video.pid(), self.audio.pid())
    }

    /// Program the selected streams belong to, when known.
    pub fn program_id(&self) -> Option<u16> {
        self.program
    }

    /// Ends the session and hands the source back.
    pub fn close(self) -> S {
        self.source
    }

    pub fn packet_size(&self) -> PacketSize {
        self.packet_size
    }

    /// Current byte offset in the source.
    pub fn position(&self) -> u64 {
        self.source.tell()
    }

    /// Type of the selected stream of `kind`.
    pub fn stream_type(&self, kind: StreamKind) -> Option<StreamType> {
        let fifo = self.fifo(kind);
        let pid = fifo.pid()?;
        let learned = self
            .registry
            .get(pid)
            .map(ElementaryStreamState::effective_type)
            .unwrap_or_default();
        Some(if learned == StreamType::Unknown {
            fifo.stream_type()
        } else {
            learned
        })
    }

    pub fn stream_state(&self, pid: u16) -> Option<&ElementaryStreamState> {
        self.registry.get(pid)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            broken_units_dropped: self.video.broken_dropped + self.audio.broken_dropped,
            queued_units_dropped: self.video.queue_dropped + self.audio.queue_dropped,
            ..self.diagnostics.clone()
        }
    }

    pub fn pat(&self) -> Option<&PAT> {
        self.pat.as_ref()
    }

    pub fn pmt(&self, program: u16) -> Option<&PMT> {
        self.pmts.get(&program)
    }

    /// Estimated stream rate in bytes per second.
    pub fn bitrate(&self) -> Option<f64> {
        self.bitrate
            .bytes_per_second()
            .or(self.config.default_bitrate.map(|rate| rate as f64))
    }

    pub(super) fn fifo(&self, kind: StreamKind) -> &OutputFifo {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    pub(super) fn fifo_mut(&mut self, kind: StreamKind) -> &mut OutputFifo {
        match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
        }
    }

    fn fifo_for_pid(&mut self, pid: u16) -> Option<&mut OutputFifo> {
        if self.video.pid() == Some(pid) {
            Some(&mut self.video)
        } else if self.audio.pid() == Some(pid) {
            Some(&mut self.audio)
        } else {
            None
        }
    }

    /// Reads the next packet into `buf` and returns its offset, resyncing
    /// when the sync byte is missing. `None` at end of stream; a trailing
    /// partial packet is ignored.
    pub(super) fn read_packet(&mut self, buf: &mut [u8; TS_PACKET_SIZE]) -> Result<Option<u64>> {
        loop {
            let position = self.source.tell();
            if self.source.read_full(buf)? < TS_PACKET_SIZE {
                return Ok(None);
            }

            if buf[0] != TS_SYNC_BYTE {
                self.diagnostics.resyncs += 1;
                debug!("sync lost at {}", position);
                self.lost_sync();
                self.source.seek(position + 1)?;
                match resync(&mut self.source, self.config.max_sync_scan) {
                    Ok(()) => continue,
                    Err(DemuxError::Eof) => return Ok(None),
                    Err(e) => return Err(e),
                }
            }

            let tail = self.packet_size.tail_len();
            if tail > 0 {
                self.source.skip(tail as u64)?;
            }
            return Ok(Some(position));
        }
    }

    /// Bytes were lost: open units are incomplete and partial headers and
    /// sections cannot be finished.
    fn lost_sync(&mut self) {
        self.video.mark_broken();
        self.audio.mark_broken();
        self.registry.reset_after_resync();
        for buffer in self.sections.values_mut() {
            buffer.reset();
        }
    }

    /// Routes one packet to the table or PES path.
    pub(super) fn dispatch(&mut self, buf: &[u8], position: u64, mode: Dispatch) -> Option<PesStart> {
        let packet = match self.parser.parse(buf) {
            Ok(packet) => packet,
            Err(e) => {
                self.diagnostics.malformed_packets += 1;
                debug!("skipping packet at {}: {}", position, e);
                return None;
            }
        };
        let header = &packet.header;
        let pid = header.pid;

        if header.transport_error {
            self.diagnostics.transport_errors += 1;
            return None;
        }
        if pid == PID_NULL {
            return None;
        }

        let (discontinuity, random_access) = packet
            .adaptation
            .as_ref()
            .map_or((false, false), |a| (a.discontinuity, a.random_access));
        if let Some(pcr) = packet.adaptation.as_ref().and_then(|a| a.pcr) {
            self.bitrate.add_pcr(pid, pcr, position, discontinuity);
        }

        if header.contains_payload
            && !self
                .registry
                .check_continuity(pid, header.continuity_counter, discontinuity)
        {
            self.diagnostics.continuity_errors += 1;
        }

        if pid == PID_PAT || self.is_pmt_pid(pid) {
            self.handle_section(pid, packet.payload, header.payload_unit_start);
            return None;
        }
        if header.scrambling_control != 0 {
            self.diagnostics.scrambled_packets += 1;
            return None;
        }

        self.handle_pes(
            pid,
            packet.payload,
            header.payload_unit_start,
            position,
            random_access,
            mode,
        )
    }

    fn is_pmt_pid(&self, pid: u16) -> bool {
        self.pat
            .as_ref()
            .is_some_and(|pat| pat.entries.iter().any(|e| e.program_map_pid == pid))
    }

    fn handle_section(&mut self, pid: u16, payload: &[u8], unit_start: bool) {
        let capacity = self.config.max_section_size;
        let buffer = self
            .sections
            .entry(pid)
            .or_insert_with(|| SectionBuffer::new(capacity));

        match buffer.push(payload, unit_start) {
            Ok(Some(section)) => self.handle_table(pid, &section),
            Ok(None) => {}
            Err(e) => {
                self.diagnostics.sections_discarded += 1;
                debug!("pid 0x{:04x}: discarding section: {}", pid, e);
            }
        }
    }

    fn handle_table(&mut self, pid: u16, section: &[u8]) {
        if let Err(e) = verify_crc(&self.crc, section) {
            self.diagnostics.crc_mismatches += 1;
            if self.config.check_crc {
                self.diagnostics.sections_discarded += 1;
                warn!("pid 0x{:04x}: {}", pid, e);
                return;
            }
            debug!("pid 0x{:04x}: {} (accepted)", pid, e);
        }

        if pid == PID_PAT {
            match parse_pat(section) {
                Ok(pat) => self.on_pat(pat),
                Err(e) => {
                    self.diagnostics.sections_discarded += 1;
                    debug!("discarding PAT: {}", e);
                }
            }
            return;
        }

        let Some(program) = section.get(3..5).map(|b| u16::from_be_bytes([b[0], b[1]])) else {
            self.diagnostics.sections_discarded += 1;
            return;
        };
        let listed = self.pat.as_ref().and_then(|pat| pat.pmt_pid(program));
        if listed != Some(pid) {
            self.diagnostics.sections_discarded += 1;
            debug!("pid 0x{:04x}: PMT for unlisted program {}", pid, program);
            return;
        }
        match parse_pmt(section, program) {
            Ok(pmt) => self.on_pmt(pmt),
            Err(e) => {
                self.diagnostics.sections_discarded += 1;
                debug!("discarding PMT of program {}: {}", program, e);
            }
        }
    }

    fn on_pat(&mut self, pat: PAT) {
        let changed = self.pat.as_ref().map_or(true, |old| old.entries != pat.entries);
        if changed {
            debug!(
                "PAT v{}: {} program(s)",
                pat.header.version_number,
                pat.entries.len()
            );
        }
        self.pat = Some(pat);
    }

    fn on_pmt(&mut self, pmt: PMT) {
        let program = pmt.program_number();
        for info in &pmt.elementary_stream_infos {
            self.registry.declare(info.elementary_pid, program, info.resolved);
        }
        if Some(program) == self.program {
            self.bitrate.set_pcr_pid(pmt.pcr_pid);
        }

        let changed = self.pmts.get(&program).map_or(true, |old| {
            old.header.version_number != pmt.header.version_number
                || old.elementary_stream_infos != pmt.elementary_stream_infos
        });
        if changed {
            debug!(
                "PMT v{} for program {}: {} stream(s), PCR pid 0x{:04x}",
                pmt.header.version_number,
                program,
                pmt.elementary_stream_infos.len(),
                pmt.pcr_pid
            );
        }

        let previous = self.pmts.insert(program, pmt);
        if previous.is_some() && changed && Some(program) == self.program {
            self.reselect(program);
        }
    }

    /// Follows a PMT update of the selected program: an automatically
    /// selected PID that disappeared is replaced by the first stream of the
    /// same kind.
    fn reselect(&mut self, program: u16) {
        let Some(pmt) = self.pmts.get(&program) else {
            return;
        };

        let mut choices = Vec::new();
        for (kind, request) in [
            (StreamKind::Video, self.config.video),
            (StreamKind::Audio, self.config.audio),
        ] {
            if request != PidRequest::Auto {
                continue;
            }
            let current = self.fifo(kind).pid();
            if current.is_some_and(|pid| pmt.stream(pid).is_some()) {
                continue;
            }
            let replacement = pmt
                .elementary_stream_infos
                .iter()
                .find(|info| info.resolved.kind() == Some(kind))
                .map(|info| (info.elementary_pid, info.resolved));
            if let Some(choice) = replacement {
                choices.push((kind, current, choice));
            }
        }

        for (kind, old, (pid, stream_type)) in choices {
            info!(
                "program {} changed: {:?} pid {:?} -> 0x{:04x} ({})",
                program, kind, old, pid, stream_type
            );
            self.fifo_mut(kind).select(Some(pid), stream_type);
        }
    }

    fn handle_pes(
        &mut self,
        pid: u16,
        payload: &[u8],
        unit_start: bool,
        position: u64,
        random_access: bool,
        mode: Dispatch,
    ) -> Option<PesStart> {
        if payload.is_empty() {
            return None;
        }

        if unit_start {
            if header_incomplete(payload) {
                trace!("pid 0x{:04x}: PES header continues in the next packet", pid);
                self.registry.entry(pid).pending = Some(PendingHeader {
                    bytes: payload.to_vec(),
                    position,
                    random_access,
                });
                if mode == Dispatch::Deliver {
                    if let Some(fifo) = self.fifo_for_pid(pid) {
                        fifo.seal();
                    }
                }
                return None;
            }
            self.registry.entry(pid).pending = None;
            return self.start_pes(pid, payload, position, random_access, mode);
        }

        let pending = self.registry.entry(pid).pending.take();
        if let Some(mut pending) = pending {
            pending.bytes.extend_from_slice(payload);
            if header_incomplete(&pending.bytes) {
                self.registry.entry(pid).pending = Some(pending);
                return None;
            }
            return self.start_pes(pid, &pending.bytes, pending.position, pending.random_access, mode);
        }

        let state = self.registry.entry(pid);
        state.payload_remaining = state.payload_remaining.saturating_sub(payload.len());
        let pts = state.last_pts.unwrap_or_default();
        if mode == Dispatch::Deliver {
            if let Some(fifo) = self.fifo_for_pid(pid) {
                fifo.continue_unit(payload, pts, position);
            }
        }
        None
    }

    /// Handles a complete PES header followed by the first payload bytes.
    fn start_pes(
        &mut self,
        pid: u16,
        payload: &[u8],
        position: u64,
        random_access: bool,
        mode: Dispatch,
    ) -> Option<PesStart> {
        let declared = self.registry.entry(pid).effective_type();
        let unit = match parse_pes(payload, declared) {
            Ok(unit) => unit,
            Err(e) => {
                self.diagnostics.pes_errors += 1;
                debug!("pid 0x{:04x}: bad PES at {}: {}", pid, position, e);
                if mode == Dispatch::Deliver {
                    let pts = self.registry.entry(pid).last_pts.unwrap_or_default();
                    if let Some(fifo) = self.fifo_for_pid(pid) {
                        fifo.lose_start(pts, position);
                    }
                }
                return None;
            }
        };

        self.registry.learn_type(pid, unit.stream_type);
        let pts = match unit.pts {
            Some(pts) => {
                if !self.registry.update_pts(pid, pts) {
                    self.diagnostics.pts_backward += 1;
                }
                self.bitrate.add_pts(pid, pts, position);
                pts
            }
            None => self.registry.entry(pid).last_pts.unwrap_or_default(),
        };

        let state = self.registry.entry(pid);
        state.payload_remaining = unit.payload_size.saturating_sub(unit.payload.len());
        let stream_type = state.effective_type();

        match mode {
            Dispatch::Scan => Some(PesStart {
                pid,
                stream_type,
                pts,
                position,
                keyframe: random_access || is_keyframe(stream_type, unit.payload),
            }),
            Dispatch::Deliver => {
                if let Some(fifo) = self.fifo_for_pid(pid) {
                    if stream_type != StreamType::Unknown {
                        fifo.set_stream_type(stream_type);
                    }
                    fifo.start_unit(unit.payload, unit.payload_size, pts, position);
                }
                None
            }
        }
    }
}

impl<S: PacketSource> FormatDemuxer for TSDemuxer<S> {
    fn next_unit(&mut self, kind: StreamKind) -> Result<Option<AccessUnit>> {
        TSDemuxer::next_unit(self, kind)
    }

    fn seek(&mut self, target: SeekTarget, absolute: bool) -> Result<()> {
        TSDemuxer::seek(self, target, absolute)
    }
}
