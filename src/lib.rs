#![doc(html_root_url = "https://docs.rs/tsdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsdemux - MPEG Transport Stream demultiplexer
//!
//! `tsdemux` pulls timestamped audio and video units out of an MPEG-2
//! Transport Stream read from any seekable byte source. It is meant to sit
//! between a file or network reader and the decoders of a media player.
//!
//! ## Features
//!
//! - 188 and 204 byte packets, with sync acquisition inside garbage
//! - PAT/PMT reassembly across packets, stream type resolution
//! - PES reassembly with private stream sniffing (AC-3, DVD LPCM)
//! - Automatic program and PID selection, or caller pinned PIDs
//! - Index-free seeking by fraction or time, aligned on video keyframes
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tsdemux = "0.1.0"
//! ```
//!
//! ### Reading audio and video
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use tsdemux::av::StreamKind;
//! use tsdemux::config::DemuxConfig;
//! use tsdemux::format::{IoSource, TSDemuxer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = IoSource::new(BufReader::new(File::open("capture.ts")?))?;
//!     let mut demuxer = TSDemuxer::open(source, DemuxConfig::new())?;
//!
//!     let (video, audio) = demuxer.selected_pids();
//!     println!("video {:?}, audio {:?}", video, audio);
//!
//!     while let Some(frame) = demuxer.next_unit(StreamKind::Video)? {
//!         println!("video pts {:.3}: {} bytes", frame.pts, frame.len());
//!         while let Some(sample) = demuxer.next_unit(StreamKind::Audio)? {
//!             if sample.pts > frame.pts {
//!                 break;
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: Stream kinds, codec families and the delivered `AccessUnit`
//!
//! - `format`: The `PacketSource` and `Demuxer` traits and the TS demuxer
//!   - Sync detection and packet parsing
//!   - PAT/PMT and PES handling
//!   - Stream selection, output reassembly, seeking
//!
//! - `config`: Demuxer tunables from defaults, files and the environment
//!
//! - `error`: Error handling types and utilities
//!   - Custom error types for different failure scenarios
//!   - Result type alias for convenience
//!
//! - `utils`: Common utilities and helper functions
//!   - Bitstream reading
//!   - CRC calculations
//!
/// Audio/Video base types
pub mod av;

/// Error types and utilities
pub mod error;

/// Media format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{DemuxError, Result};
