use crate::av::{AccessUnit, StreamKind};
use crate::Result;

pub mod source;
pub mod ts;

/// Where a seek should land.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Fraction of the stream length, `0.0..=1.0`.
    Fraction(f64),
    /// Seconds, converted to bytes with the estimated bitrate.
    Seconds(f64),
}

/// Common trait for pull-based format demuxers
pub trait Demuxer {
    /// Returns the next complete unit of the given kind, `None` at end of stream.
    fn next_unit(&mut self, kind: StreamKind) -> Result<Option<AccessUnit>>;

    /// Repositions the stream. `absolute` measures from the stream start,
    /// otherwise from the current position.
    fn seek(&mut self, target: SeekTarget, absolute: bool) -> Result<()>;
}

pub use self::source::{IoSource, PacketSource};
pub use self::ts::TSDemuxer;
