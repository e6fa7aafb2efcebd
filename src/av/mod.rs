//! Elementary stream types shared by the demuxer and its callers.

use std::fmt;

/// Which of the two selected streams a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
}

/// Codec family carried by an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamType {
    #[default]
    Unknown,
    VideoMpeg1,
    VideoMpeg2,
    VideoMpeg4,
    VideoH264,
    AudioMp2,
    AudioAc3,
    AudioLpcm,
    AudioAac,
}

impl StreamType {
    pub fn is_video(self) -> bool {
        matches!(
            self,
            StreamType::VideoMpeg1
                | StreamType::VideoMpeg2
                | StreamType::VideoMpeg4
                | StreamType::VideoH264
        )
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            StreamType::AudioMp2 | StreamType::AudioAc3 | StreamType::AudioLpcm | StreamType::AudioAac
        )
    }

    /// The stream kind this type is delivered as, if any.
    pub fn kind(self) -> Option<StreamKind> {
        if self.is_video() {
            Some(StreamKind::Video)
        } else if self.is_audio() {
            Some(StreamKind::Audio)
        } else {
            None
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Unknown => "unknown",
            StreamType::VideoMpeg1 => "MPEG-1 video",
            StreamType::VideoMpeg2 => "MPEG-2 video",
            StreamType::VideoMpeg4 => "MPEG-4 video",
            StreamType::VideoH264 => "H.264 video",
            StreamType::AudioMp2 => "MPEG audio",
            StreamType::AudioAc3 => "AC-3 audio",
            StreamType::AudioLpcm => "LPCM audio",
            StreamType::AudioAac => "AAC audio",
        };
        f.write_str(name)
    }
}

mod packet;
pub use packet::*;
