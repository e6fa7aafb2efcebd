use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync lost: no sync byte within {0} bytes")]
    SyncLost(usize),

    #[error("end of stream")]
    Eof,

    #[error("not an MPEG transport stream")]
    NotTransportStream,

    #[error("no playable audio or video stream found")]
    NoPlayableStreams,

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("pes error: {0}")]
    Pes(#[from] PesError),

    #[error("seek error: {0}")]
    Seek(#[from] SeekError),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Malformed PAT/PMT section. The section is dropped, known tables persist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("wrong table id: expected 0x{expected:02x}, found 0x{found:02x}")]
    WrongTableId { expected: u8, found: u8 },

    #[error("section is not currently applicable")]
    NotCurrent,

    #[error("section too short: {0} bytes")]
    SectionTooShort(usize),

    #[error("section length {declared} exceeds {available} available bytes")]
    LengthOverflow { declared: usize, available: usize },

    #[error("descriptor loop overruns the section")]
    DescriptorOverflow,

    #[error("PMT for program {found} while decoding program {expected}")]
    ProgramMismatch { expected: u16, found: u16 },

    #[error("crc mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Bad PES header. The offending payload is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PesError {
    #[error("invalid PES start code")]
    InvalidStartCode,

    #[error("PES header length {header_len} too long for {available} bytes")]
    HeaderTooLong { header_len: usize, available: usize },

    #[error("PES header truncated")]
    Truncated,

    #[error("unsupported PES header syntax (flags 0x{0:02x})")]
    UnsupportedSyntax(u8),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeekError {
    #[error("seek target {0} out of range")]
    OutOfRange(f64),

    #[error("source does not support this seek")]
    NotSeekable,
}

pub type Result<T> = std::result::Result<T, DemuxError>;
