//! # MPEG Transport Stream (TS) Demultiplexing
//!
//! This module turns a raw transport stream into timestamped elementary
//! stream units:
//!
//! - Packet size detection (188 and 204 byte packets) and resync
//! - Program Specific Information (PAT/PMT) reassembly and decoding
//! - Packetized Elementary Stream (PES) header parsing and payload sniffing
//! - Automatic program and PID selection
//! - Approximate seeking by fraction or time, aligned on video keyframes
//!
//! ## Example Usage
//!
//! ### Demuxing an in-memory stream
//!
//! ```rust,no_run
//! use std::io::Cursor;
//! use tsdemux::av::StreamKind;
//! use tsdemux::config::{DemuxConfig, PidRequest};
//! use tsdemux::format::{IoSource, SeekTarget, TSDemuxer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let bytes: Vec<u8> = Vec::new();
//! let config = DemuxConfig {
//!     video: PidRequest::Disabled,
//!     ..DemuxConfig::default()
//! };
//! let mut demuxer = TSDemuxer::open(IoSource::new(Cursor::new(bytes))?, config)?;
//!
//! demuxer.seek(SeekTarget::Fraction(0.5), true)?;
//! while let Some(unit) = demuxer.next_unit(StreamKind::Audio)? {
//!     println!("{} at {:.3}s", unit.stream_type, unit.pts);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Detecting the packet size
//!
//! ```rust
//! use tsdemux::format::ts::{detect_packet_size, PacketSize, TS_PACKET_SIZE};
//!
//! let mut data = vec![0u8; 40 * TS_PACKET_SIZE];
//! for packet in data.chunks_exact_mut(TS_PACKET_SIZE) {
//!     packet[0] = 0x47;
//! }
//! assert_eq!(detect_packet_size(&data), Some(PacketSize::Standard));
//! ```

/// TS demuxer driving the whole pipeline
pub mod demuxer;

/// Output reassembly of selected streams
pub mod fifo;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet handling and payload classification
pub mod pes;

mod probe;

/// PAT/PMT decoders
pub mod psi;

/// Per-PID stream state
pub mod registry;

/// PSI section reassembly
pub mod section;

/// Seeking and bitrate estimation
pub mod seek;

/// Packet size detection and resync
pub mod sync;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use demuxer::{Diagnostics, TSDemuxer};
pub use pes::{parse_pes, PESHeader, PESPacket, PesUnit};
pub use psi::{parse_pat, parse_pmt, resolve_stream_type, verify_crc};
pub use registry::ElementaryStreamState;
pub use sync::{detect_packet_size, find_sync};
pub use types::{
    ElementaryStreamInfo,
    PacketSize,
    TSHeader,
    PAT,
    PMT,
    PID_NULL,
    PID_PAT,
    TS_FEC_PACKET_SIZE,
    TS_PACKET_SIZE,
};
