use super::types::*;
use crate::av::StreamType;
use crate::error::PesError;
use crate::utils::BitReader;
use bytes::{BufMut, BytesMut};

/// Packetized Elementary Stream (PES) header structure
///
/// Only the fields the demuxer acts on are kept; optional header fields
/// other than PTS/DTS are skipped by `header_data_length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Bytes following this field, 0 when unbounded
    pub packet_length: u16,
    /// Control field for scrambling mode
    pub scrambling_control: u8,
    /// Data alignment indicator
    pub data_alignment: bool,
    /// 2-bit PTS_DTS_flags: `0b10` PTS only, `0b11` PTS and DTS
    pub pts_dts_flags: u8,
    /// Length of the optional fields and stuffing that follow
    pub header_data_length: u8,
    /// Presentation Time Stamp (33 bits, 90 kHz)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits, 90 kHz)
    pub dts: Option<u64>,
}

impl PESHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            packet_length: 0,
            scrambling_control: 0,
            data_alignment: false,
            pts_dts_flags: 0,
            header_data_length: 0,
            pts: None,
            dts: None,
        }
    }

    /// Sets the presentation time stamp, in seconds.
    pub fn with_pts(mut self, seconds: f64) -> Self {
        self.pts = Some(seconds_to_pts(seconds));
        self.pts_dts_flags |= 0b10;
        self.header_data_length = self.timestamps_len();
        self
    }

    /// Sets the decoding time stamp, in seconds. Only written alongside a PTS.
    pub fn with_dts(mut self, seconds: f64) -> Self {
        self.dts = Some(seconds_to_pts(seconds));
        self.pts_dts_flags |= 0b01;
        self.header_data_length = self.timestamps_len();
        self
    }

    fn timestamps_len(&self) -> u8 {
        match self.pts_dts_flags {
            0b10 => 5,
            0b11 => 10,
            _ => 0,
        }
    }

    /// Bytes occupied by the header, start code through the optional fields.
    pub fn size(&self) -> usize {
        PES_FIXED_HEADER_SIZE + self.header_data_length as usize
    }

    /// Decodes the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, PesError> {
        if data.len() < 3 || data[..3] != [0x00, 0x00, 0x01] {
            return Err(PesError::InvalidStartCode);
        }
        if data.len() < PES_FIXED_HEADER_SIZE {
            return Err(PesError::Truncated);
        }
        if data[6] & 0xc0 != 0x80 {
            return Err(PesError::UnsupportedSyntax(data[6]));
        }

        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]);
        let header_data_length = data[8];
        let header_len = header_data_length as usize;
        if header_len + PES_FIXED_HEADER_SIZE > data.len()
            || (packet_length != 0 && header_len + 3 > packet_length as usize)
        {
            return Err(PesError::HeaderTooLong {
                header_len,
                available: data.len(),
            });
        }

        let pts_dts_flags = data[7] >> 6;
        let optional = &data[PES_FIXED_HEADER_SIZE..PES_FIXED_HEADER_SIZE + header_len];
        let pts = if pts_dts_flags & 0b10 != 0 && header_len >= 5 {
            read_timestamp(&optional[..5])
        } else {
            None
        };
        let dts = if pts_dts_flags == 0b11 && header_len >= 10 {
            read_timestamp(&optional[5..10])
        } else {
            None
        };

        Ok(Self {
            stream_id,
            packet_length,
            scrambling_control: (data[6] >> 4) & 0x03,
            data_alignment: data[6] & 0x04 != 0,
            pts_dts_flags,
            header_data_length,
            pts,
            dts,
        })
    }

    /// Writes the PES header to a BytesMut buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&[0x00, 0x00, 0x01]);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);

        let mut flags = 0x80 | (self.scrambling_control & 0x03) << 4;
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let pts_dts_flags = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0b11,
            (Some(_), None) => 0b10,
            _ => 0,
        };
        buf.put_u8(pts_dts_flags << 6);

        let timestamps = match pts_dts_flags {
            0b11 => 10,
            0b10 => 5,
            _ => 0,
        };
        let stuffing = (self.header_data_length as usize).saturating_sub(timestamps);
        buf.put_u8((timestamps + stuffing) as u8);

        if let Some(pts) = self.pts {
            let marker = if pts_dts_flags == 0b11 { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
            if let Some(dts) = self.dts {
                write_timestamp(buf, 0x10, dts);
            }
        }
        buf.put_bytes(0xff, stuffing);
    }
}

/// Represents a complete Packetized Elementary Stream (PES) packet.
#[derive(Debug, Clone)]
pub struct PESPacket {
    pub header: PESHeader,
    pub payload: Vec<u8>,
    /// Write `PES_packet_length` as 0 even when the packet would fit.
    pub unbounded: bool,
}

impl PESPacket {
    pub fn new(stream_id: u8, payload: Vec<u8>) -> Self {
        Self {
            header: PESHeader::new(stream_id),
            payload,
            unbounded: false,
        }
    }

    pub fn with_pts(mut self, seconds: f64) -> Self {
        self.header = self.header.with_pts(seconds);
        self
    }

    pub fn with_dts(mut self, seconds: f64) -> Self {
        self.header = self.header.with_dts(seconds);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.unbounded = true;
        self
    }

    /// Writes the complete PES packet, computing `PES_packet_length`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut header = self.header.clone();
        let following = 3 + header.header_data_length as usize + self.payload.len();
        header.packet_length = if self.unbounded || following > u16::MAX as usize {
            0
        } else {
            following as u16
        };
        header.write_to(buf);
        buf.put_slice(&self.payload);
    }

    /// Returns the total length of the PES packet in bytes.
    pub fn encoded_len(&self) -> usize {
        self.header.size() + self.payload.len()
    }
}

fn read_timestamp(data: &[u8]) -> Option<u64> {
    let mut reader = BitReader::new(data);
    reader.skip_bits(4).ok()?;
    let high = reader.read_bits(3).ok()? as u64;
    reader.skip_bits(1).ok()?;
    let mid = reader.read_bits(15).ok()? as u64;
    reader.skip_bits(1).ok()?;
    let low = reader.read_bits(15).ok()? as u64;
    Some(high << 30 | mid << 15 | low)
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & 0x1_ffff_ffff; // 33 bits
    buf.put_u8(marker | ((ts >> 29) & 0x0e) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xfffe) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xfffe) | 0x01) as u16);
}

/// One PES packet start as seen in a single transport packet payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PesUnit<'a> {
    pub stream_id: u8,
    /// Presentation time in seconds.
    pub pts: Option<f64>,
    /// Elementary stream bytes carried by this transport packet, after any
    /// private-stream sub-header.
    pub payload: &'a [u8],
    /// Elementary stream bytes the whole PES packet carries, 0 when unbounded.
    pub payload_size: usize,
    pub stream_type: StreamType,
}

/// DVD LPCM sub-header length when no `01 80` marker is found.
const LPCM_SUBHEADER_SIZE: usize = 7;
/// Bytes of an LPCM payload searched for the marker.
const LPCM_MARKER_SCAN: usize = 16;
const AC3_SUBHEADER_SIZE: usize = 4;

/// True while `bytes` is the beginning of a PES header that continues in
/// the next packet. A wrong start code never counts as incomplete.
pub fn header_incomplete(bytes: &[u8]) -> bool {
    let prefix = bytes.len().min(3);
    if bytes[..prefix] != [0x00, 0x00, 0x01][..prefix] {
        return false;
    }
    match bytes.get(8) {
        Some(&header_len) => bytes.len() < PES_FIXED_HEADER_SIZE + header_len as usize,
        None => true,
    }
}

/// Parses the PES header at the start of a unit-start payload and works out
/// which elementary stream it carries.
///
/// `declared` is the type known from the PMT (or a previous classification).
/// Payload bytes identify private stream 1 content before any PMT is seen.
pub fn parse_pes(bytes: &[u8], declared: StreamType) -> Result<PesUnit<'_>, PesError> {
    let header = PESHeader::parse(bytes)?;
    let mut payload = &bytes[header.size()..];

    let (stream_type, skip) = classify(header.stream_id, payload, declared);
    let skip = skip.min(payload.len());
    payload = &payload[skip..];

    let payload_size = if header.packet_length == 0 {
        0
    } else {
        (header.packet_length as usize)
            .saturating_sub(header.header_data_length as usize + 3)
            .saturating_sub(skip)
    };

    Ok(PesUnit {
        stream_id: header.stream_id,
        pts: header.pts.map(pts_to_seconds),
        payload,
        payload_size,
        stream_type,
    })
}

/// Returns the stream type and the sub-header bytes to drop.
fn classify(stream_id: u8, payload: &[u8], declared: StreamType) -> (StreamType, usize) {
    match stream_id {
        STREAM_ID_PRIVATE_1 => classify_private(payload, declared),
        0xe0..=0xef if declared.is_video() => (declared, 0),
        0xe0..=0xef => (StreamType::VideoMpeg2, 0),
        STREAM_ID_MPEG4_FLEXMUX => (StreamType::VideoMpeg4, 0),
        0xc0..=0xdf if declared.is_audio() => (declared, 0),
        0xc0..=0xdf => (StreamType::AudioMp2, 0),
        _ => (declared, 0),
    }
}

fn classify_private(payload: &[u8], declared: StreamType) -> (StreamType, usize) {
    if payload.starts_with(&[0x0b, 0x77]) || declared == StreamType::AudioAc3 {
        return (StreamType::AudioAc3, 0);
    }
    match payload.first().map(|b| b & 0xf0) {
        Some(0x80) => (StreamType::AudioAc3, AC3_SUBHEADER_SIZE),
        Some(0xa0) => {
            let window = &payload[..payload.len().min(LPCM_MARKER_SCAN)];
            let skip = window
                .windows(2)
                .position(|w| w == [0x01, 0x80])
                .map_or(LPCM_SUBHEADER_SIZE, |i| i + 2);
            (StreamType::AudioLpcm, skip)
        }
        _ => (declared, 0),
    }
}
