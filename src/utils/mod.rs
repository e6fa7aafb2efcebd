//! # Utility Functions and Types
//!
//! Helpers shared by the transport stream parsers:
//!
//! - Bounds-checked bit and byte reading
//! - CRC-32/MPEG-2 calculation for PSI sections
//!
//! ## Bit Operations
//!
//! ```rust
//! use tsdemux::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! let value = reader.read_bits(3)?; // Reads first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use tsdemux::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new();
//! assert_eq!(crc.calculate(&[0x01, 0x01]), 0xD66FB816);
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

pub use bits::*;
pub use crc::Crc32Mpeg2;
