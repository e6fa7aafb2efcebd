//! Generic PSI section reassembly across transport packets.

use crate::error::TableError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Filling,
}

/// Accumulates one PSI section from the payloads of a single PID.
///
/// A payload-unit-start packet restarts the buffer and honours the leading
/// pointer field, whose skip may run on into later packets. The section is
/// returned once `section_length + 3` bytes are buffered; bytes after it
/// are dropped.
#[derive(Debug)]
pub struct SectionBuffer {
    state: State,
    buffer: Vec<u8>,
    skip: usize,
    capacity: usize,
}

impl SectionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: State::Idle,
            buffer: Vec::new(),
            skip: 0,
            capacity,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.skip = 0;
    }

    #[cfg(test)]
    fn is_filling(&self) -> bool {
        self.state == State::Filling
    }

    /// Feeds one packet payload. Returns the complete section when this
    /// payload finishes it.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Result<Option<Vec<u8>>, TableError> {
        let mut data = payload;

        if unit_start {
            let Some((&pointer, rest)) = data.split_first() else {
                self.reset();
                return Ok(None);
            };
            self.state = State::Filling;
            self.buffer.clear();
            self.skip = pointer as usize;
            data = rest;
        } else if self.state == State::Idle {
            return Ok(None);
        }

        let skipped = self.skip.min(data.len());
        self.skip -= skipped;
        data = &data[skipped..];

        let room = self.capacity.saturating_sub(self.buffer.len());
        self.buffer.extend_from_slice(&data[..data.len().min(room)]);

        let Some(total) = self.declared_len() else {
            if self.buffer.len() >= self.capacity {
                let declared = self.buffer.len();
                self.reset();
                return Err(TableError::LengthOverflow {
                    declared,
                    available: self.capacity,
                });
            }
            return Ok(None);
        };
        if total > self.capacity {
            self.reset();
            return Err(TableError::LengthOverflow {
                declared: total,
                available: self.capacity,
            });
        }
        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut section = std::mem::take(&mut self.buffer);
        section.truncate(total);
        self.reset();
        Ok(Some(section))
    }

    /// Total section size (header included) once the length field is buffered.
    fn declared_len(&self) -> Option<usize> {
        if self.buffer.len() < 3 {
            return None;
        }
        Some((((self.buffer[1] as usize) & 0x0f) << 8 | self.buffer[2] as usize) + 3)
    }
}
