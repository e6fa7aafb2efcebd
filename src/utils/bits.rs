use crate::error::{DemuxError, Result};

/// A bounds-checked bit-level reader over a byte slice.
///
/// Used for the packed fields of section headers and PES timestamps. Every
/// read checks the remaining length and fails with
/// [`DemuxError::InvalidData`] instead of reading past the slice.
///
/// Example:
/// ```
/// use tsdemux::utils::BitReader;
///
/// let data = [0b10110011, 0x12];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);    // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// reader.align_byte();
/// assert_eq!(reader.read_u8().unwrap(), 0x12);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    /// Returns true for 1, false for 0.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(DemuxError::InvalidData("Reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits and returns them as a big-endian number.
    ///
    /// Returns error if n > 32 or end of data is reached.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(DemuxError::InvalidData("Too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(DemuxError::InvalidData("Reached end of data".into()));
        }

        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Reads one byte. The reader must be byte aligned.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_aligned()?;
        let byte = *self
            .data
            .get(self.byte_offset)
            .ok_or_else(|| DemuxError::InvalidData("Reached end of data".into()))?;
        self.byte_offset += 1;
        Ok(byte)
    }

    /// Reads a big-endian u16. The reader must be byte aligned.
    pub fn read_u16(&mut self) -> Result<u16> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok(hi << 8 | lo)
    }

    /// Returns the next `n` bytes as a slice and advances past them.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure_aligned()?;
        let end = self
            .byte_offset
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| DemuxError::InvalidData("Slice past end of data".into()))?;
        let slice = &self.data[self.byte_offset..end];
        self.byte_offset = end;
        Ok(slice)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if n as usize > self.available_bits() {
            return Err(DemuxError::InvalidData("Skip past end of data".into()));
        }
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Skips n whole bytes. The reader must be byte aligned.
    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        self.read_slice(n).map(|_| ())
    }

    /// Aligns reader to next byte boundary by skipping remaining bits in current byte.
    pub fn align_byte(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }

    /// Returns number of whole bytes left after the current byte position.
    pub fn remaining_bytes(&self) -> usize {
        self.available_bits() / 8
    }

    /// Current byte offset into the underlying slice.
    pub fn byte_position(&self) -> usize {
        self.byte_offset
    }

    fn ensure_aligned(&self) -> Result<()> {
        if self.bit_offset != 0 {
            return Err(DemuxError::InvalidData("Unaligned byte read".into()));
        }
        Ok(())
    }
}
