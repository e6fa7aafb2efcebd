use super::types::*;
use crate::error::{DemuxError, Result};

/// A decoded view over one 188-byte transport packet.
#[derive(Debug)]
pub struct TSPacket<'a> {
    pub header: TSHeader,
    pub adaptation: Option<AdaptationField>,
    /// Payload bytes after the header and adaptation field; empty when the
    /// packet carries none.
    pub payload: &'a [u8],
}

/// Stateless transport packet decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(DemuxError::InvalidData("TS packet too short".into()));
        }

        if data[0] != TS_SYNC_BYTE {
            return Err(DemuxError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Decodes the adaptation field starting at `offset` (its length byte).
    ///
    /// Only the flags the demuxer acts on and the PCR are decoded; the rest
    /// of the field is skipped by length.
    pub fn parse_adaptation_field(&self, data: &[u8], offset: usize) -> Result<AdaptationField> {
        let length = *data
            .get(offset)
            .ok_or_else(|| DemuxError::InvalidData("Adaptation field missing".into()))?
            as usize;
        if offset + 1 + length > data.len() {
            return Err(DemuxError::InvalidData("Adaptation field too long".into()));
        }

        let mut field = AdaptationField {
            length,
            ..Default::default()
        };
        if length == 0 {
            return Ok(field);
        }

        let flags = data[offset + 1];
        field.discontinuity = (flags & 0x80) != 0;
        field.random_access = (flags & 0x40) != 0;

        if (flags & 0x10) != 0 && length >= 7 {
            let pos = offset + 2;
            let pcr_base = ((data[pos] as u64) << 25)
                | ((data[pos + 1] as u64) << 17)
                | ((data[pos + 2] as u64) << 9)
                | ((data[pos + 3] as u64) << 1)
                | ((data[pos + 4] & 0x80) as u64 >> 7);
            let pcr_ext = (((data[pos + 4] & 0x01) as u64) << 8) | (data[pos + 5] as u64);
            field.pcr = Some(pcr_base * 300 + pcr_ext);
        }

        Ok(field)
    }

    /// Splits a packet into header, adaptation field and payload.
    ///
    /// `data` holds the 188 packet bytes (any FEC tail already stripped).
    pub fn parse<'a>(&self, data: &'a [u8]) -> Result<TSPacket<'a>> {
        let header = self.parse_header(data)?;
        let data = &data[..data.len().min(TS_PACKET_SIZE)];

        let mut payload_offset = TS_HEADER_SIZE;
        let adaptation = if header.adaptation_field_exists {
            let field = self.parse_adaptation_field(data, payload_offset)?;
            payload_offset += field.length + 1;
            Some(field)
        } else {
            None
        };

        let payload = if header.contains_payload {
            &data[payload_offset.min(data.len())..]
        } else {
            &[]
        };

        Ok(TSPacket {
            header,
            adaptation,
            payload,
        })
    }
}
