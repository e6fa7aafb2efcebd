use super::StreamType;
use bytes::Bytes;

/// One complete, sealed elementary stream unit handed to a decoder.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Bytes,
    /// Presentation time in seconds.
    pub pts: f64,
    /// Byte offset of the transport packet that started this unit.
    pub position: u64,
    pub pid: u16,
    pub stream_type: StreamType,
    /// Set only when broken units are kept (see `DemuxConfig::keep_broken`).
    pub broken: bool,
}

impl AccessUnit {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: 0.0,
            position: 0,
            pid: 0,
            stream_type: StreamType::Unknown,
            broken: false,
        }
    }

    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    pub fn with_stream(mut self, pid: u16, stream_type: StreamType) -> Self {
        self.pid = pid;
        self.stream_type = stream_type;
        self
    }

    pub fn with_broken_flag(mut self, broken: bool) -> Self {
        self.broken = broken;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
