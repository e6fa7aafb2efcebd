//! Stream and program selection at open time.

use super::demuxer::{Diagnostics, Dispatch, PesStart, TSDemuxer};
use super::types::*;
use crate::av::{StreamKind, StreamType};
use crate::config::PidRequest;
use crate::error::{DemuxError, Result};
use crate::format::PacketSource;
use log::{debug, info};

/// A stream picked for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pick {
    pid: u16,
    stream_type: StreamType,
}

impl<S: PacketSource> TSDemuxer<S> {
    /// Reads ahead from the data start, picks the video and audio PIDs and
    /// rewinds.
    ///
    /// Stops at `probe_size`, at end of stream, once both kinds are settled,
    /// or once `audio_only_probe_limit` bytes went by after the audio pick
    /// without any video.
    pub(super) fn probe(&mut self) -> Result<()> {
        let video_request = self.config.video;
        let audio_request = self.config.audio;
        if video_request.is_disabled() && audio_request.is_disabled() {
            debug!("both stream kinds disabled, not probing");
            return Ok(());
        }

        let start = self.movie_start;
        let mut video: Option<Pick> = None;
        let mut audio: Option<Pick> = None;
        // where the audio pick was made
        let mut audio_at: Option<u64> = None;
        let mut buf = [0u8; TS_PACKET_SIZE];

        while let Some(position) = self.read_packet(&mut buf)? {
            let read = self.source.tell() - start;
            if let Some(pes) = self.dispatch(&buf, position, Dispatch::Scan) {
                if video.is_none() && self.accepts(StreamKind::Video, video_request, &pes) {
                    video = Some(self.pick(StreamKind::Video, &pes));
                }
                if audio.is_none() && self.accepts(StreamKind::Audio, audio_request, &pes) {
                    audio = Some(self.pick(StreamKind::Audio, &pes));
                    audio_at = Some(pes.position);
                }
            }

            let video_done = video.is_some() || video_request.is_disabled();
            let audio_done = audio.is_some() || audio_request.is_disabled();
            if video_done && audio_done {
                break;
            }
            if let Some(at) = audio_at {
                let audio_only = self.source.tell().saturating_sub(at);
                if video_request == PidRequest::Auto && audio_only >= self.config.audio_only_probe_limit {
                    debug!("no video within {} bytes of audio, assuming audio only", audio_only);
                    break;
                }
            }
            if read >= self.config.probe_size {
                debug!("probe size of {} bytes reached", self.config.probe_size);
                break;
            }
        }

        // pinned PIDs stay selected even when nothing was seen on them
        let video = video.or_else(|| self.pinned(video_request));
        let audio = audio.or_else(|| self.pinned(audio_request));
        if video.is_none() && audio.is_none() {
            return Err(DemuxError::NoPlayableStreams);
        }

        if self.program.is_none() {
            self.program = [video, audio]
                .iter()
                .flatten()
                .find_map(|pick| self.registry.get(pick.pid).and_then(|s| s.program));
        }
        if let Some(pcr_pid) = self.program.and_then(|p| self.pmt(p)).map(|pmt| pmt.pcr_pid) {
            self.bitrate.set_pcr_pid(pcr_pid);
        }

        info!(
            "program {:?}: video {}, audio {}",
            self.program,
            describe(video),
            describe(audio)
        );
        self.video
            .select(video.map(|p| p.pid), video.map_or(StreamType::Unknown, |p| p.stream_type));
        self.audio
            .select(audio.map(|p| p.pid), audio.map_or(StreamType::Unknown, |p| p.stream_type));

        self.source.seek(self.movie_start)?;
        self.registry.reset_after_probe();
        for buffer in self.sections.values_mut() {
            buffer.reset();
        }
        self.diagnostics = Diagnostics::default();
        self.eof = false;
        Ok(())
    }

    fn accepts(&self, kind: StreamKind, request: PidRequest, pes: &PesStart) -> bool {
        match request {
            PidRequest::Disabled => false,
            PidRequest::Pid(pid) => pid == pes.pid,
            PidRequest::Auto => {
                pes.stream_type.kind() == Some(kind) && self.program_matches(pes.pid)
            }
        }
    }

    /// A PID fits the pinned program, else the program of the first pick.
    /// PIDs no PMT lists only fit while no PMT has been seen.
    fn program_matches(&self, pid: u16) -> bool {
        let wanted = self.config.program.or(self.program);
        let owner = self.registry.get(pid).and_then(|s| s.program);
        match (wanted, owner) {
            (None, _) => true,
            (Some(wanted), Some(owner)) => wanted == owner,
            (Some(_), None) => self.pmts.is_empty(),
        }
    }

    fn pick(&mut self, kind: StreamKind, pes: &PesStart) -> Pick {
        if self.program.is_none() {
            self.program = self.registry.get(pes.pid).and_then(|s| s.program);
        }
        debug!(
            "{:?}: pid 0x{:04x} ({}) at byte {}",
            kind, pes.pid, pes.stream_type, pes.position
        );
        Pick {
            pid: pes.pid,
            stream_type: pes.stream_type,
        }
    }

    fn pinned(&self, request: PidRequest) -> Option<Pick> {
        match request {
            PidRequest::Pid(pid) => Some(Pick {
                pid,
                stream_type: self
                    .registry
                    .get(pid)
                    .map(|s| s.effective_type())
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

fn describe(pick: Option<Pick>) -> String {
    match pick {
        Some(pick) => format!("0x{:04x} ({})", pick.pid, pick.stream_type),
        None => "none".to_string(),
    }
}
