use crate::av::StreamType;
use crate::utils::crc::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};

// Stream IDs
pub const STREAM_ID_PRIVATE_1: u8 = 0xbd;
pub const STREAM_ID_PADDING: u8 = 0xbe;
pub const STREAM_ID_MPEG4_FLEXMUX: u8 = 0xfa;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_NULL: u16 = 0x1fff;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Descriptor tags
pub const DESCRIPTOR_REGISTRATION: u8 = 0x05;
pub const DESCRIPTOR_DVB_AC3: u8 = 0x6a;

// Constants
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_FEC_PACKET_SIZE: usize = 204;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_MAX_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
/// Packets that must line up on the sync byte before a size is accepted.
pub const NUM_CONSECUTIVE_PACKETS: usize = 32;
/// Fixed PES header bytes up to and including PES_header_data_length.
pub const PES_FIXED_HEADER_SIZE: usize = 9;
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

/// On-wire transport packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// Plain 188-byte packets.
    Standard,
    /// 204-byte packets: 188 bytes followed by a 16-byte Reed-Solomon tail.
    Fec,
}

impl PacketSize {
    pub fn len(self) -> usize {
        match self {
            PacketSize::Standard => TS_PACKET_SIZE,
            PacketSize::Fec => TS_FEC_PACKET_SIZE,
        }
    }

    /// Bytes after the 188-byte packet that are skipped unread.
    pub fn tail_len(self) -> usize {
        self.len() - TS_PACKET_SIZE
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
    pub pcr: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: TS_SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn new(pid: u16, payload_unit_start: bool, continuity_counter: u8) -> Self {
        Self {
            pid,
            payload_unit_start,
            continuity_counter: continuity_counter & 0x0f,
            ..Default::default()
        }
    }

    /// The 2-bit adaptation_field_control value.
    pub fn adaptation_field_control(&self) -> u8 {
        (self.adaptation_field_exists as u8) << 1 | self.contains_payload as u8
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

/// Long-form PSI section header shared by PAT and PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub section_length: u16,
    /// transport_stream_id for a PAT, program_number for a PMT.
    pub table_id_extension: u16,
    pub version_number: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl SectionHeader {
    pub const SIZE: usize = 8;

    pub fn new(table_id: u8, table_id_extension: u16, version_number: u8) -> Self {
        Self {
            table_id,
            section_syntax_indicator: true,
            section_length: 0,
            table_id_extension,
            version_number: version_number & 0x1f,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
        }
    }

    /// Writes the 8 header bytes with the given section_length.
    fn write_to(&self, buf: &mut BytesMut, section_length: usize) {
        buf.put_u8(self.table_id);
        let syntax = if self.section_syntax_indicator { 0x80 } else { 0 };
        buf.put_u16(((syntax | 0x30) as u16) << 8 | (section_length as u16 & 0x0fff));
        buf.put_u16(self.table_id_extension);
        buf.put_u8(0xc0 | (self.version_number & 0x1f) << 1 | self.current_next as u8);
        buf.put_u8(self.section_number);
        buf.put_u8(self.last_section_number);
    }
}

/// Appends the CRC of everything written since `start`.
fn put_section_crc(buf: &mut BytesMut, start: usize) {
    let crc = Crc32Mpeg2::new().calculate(&buf[start..]);
    buf.put_u32(crc);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PATEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PAT {
    pub header: SectionHeader,
    pub entries: Vec<PATEntry>,
}

impl PAT {
    pub fn new(transport_stream_id: u16) -> Self {
        Self {
            header: SectionHeader::new(TABLE_ID_PAT, transport_stream_id, 0),
            entries: Vec::new(),
        }
    }

    pub fn with_program(mut self, program_number: u16, program_map_pid: u16) -> Self {
        self.entries.push(PATEntry {
            program_number,
            program_map_pid,
        });
        self
    }

    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.program_number == program_number)
            .map(|e| e.program_map_pid)
    }

    /// Encodes a complete section, table_id through CRC.
    pub fn write_section(&self, buf: &mut BytesMut) {
        let start = buf.len();
        let section_length = 5 + self.entries.len() * 4 + 4;
        self.header.write_to(buf, section_length);
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
        }
        put_section_crc(buf, start);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
    /// Codec family resolved from `stream_type` and the descriptors.
    pub resolved: StreamType,
}

impl ElementaryStreamInfo {
    pub fn new(stream_type: u8, elementary_pid: u16) -> Self {
        Self {
            stream_type,
            elementary_pid,
            descriptors: Vec::new(),
            resolved: StreamType::Unknown,
        }
    }

    pub fn with_descriptor(mut self, tag: u8, data: &[u8]) -> Self {
        self.descriptors.push(Descriptor {
            tag,
            data: data.to_vec(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PMT {
    pub header: SectionHeader,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl PMT {
    pub fn new(program_number: u16, pcr_pid: u16) -> Self {
        Self {
            header: SectionHeader::new(TABLE_ID_PMT, program_number, 0),
            pcr_pid,
            program_descriptors: Vec::new(),
            elementary_stream_infos: Vec::new(),
        }
    }

    pub fn with_stream(mut self, info: ElementaryStreamInfo) -> Self {
        self.elementary_stream_infos.push(info);
        self
    }

    pub fn program_number(&self) -> u16 {
        self.header.table_id_extension
    }

    pub fn stream(&self, pid: u16) -> Option<&ElementaryStreamInfo> {
        self.elementary_stream_infos
            .iter()
            .find(|info| info.elementary_pid == pid)
    }

    /// Encodes a complete section, table_id through CRC.
    pub fn write_section(&self, buf: &mut BytesMut) {
        let start = buf.len();
        let body_len = 4
            + descriptors_len(&self.program_descriptors)
            + self
                .elementary_stream_infos
                .iter()
                .map(|info| 5 + descriptors_len(&info.descriptors))
                .sum::<usize>();
        self.header.write_to(buf, 5 + body_len + 4);

        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);
        buf.put_u16((descriptors_len(&self.program_descriptors) as u16) & 0x3ff | 0xf << 12);
        write_descriptors(buf, &self.program_descriptors);

        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);
            buf.put_u16((descriptors_len(&info.descriptors) as u16) & 0x3ff | 0xf << 12);
            write_descriptors(buf, &info.descriptors);
        }

        put_section_crc(buf, start);
    }
}

fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(|d| 2 + d.data.len()).sum()
}

fn write_descriptors(buf: &mut BytesMut, descriptors: &[Descriptor]) {
    for desc in descriptors {
        buf.put_u8(desc.tag);
        buf.put_u8(desc.data.len() as u8);
        buf.put_slice(&desc.data);
    }
}

// Time conversion utilities
pub fn pts_to_seconds(pts: u64) -> f64 {
    pts as f64 / PTS_HZ as f64
}

pub fn seconds_to_pts(seconds: f64) -> u64 {
    (seconds * PTS_HZ as f64).round() as u64 & 0x1_ffff_ffff
}

pub fn pcr_to_seconds(pcr: u64) -> f64 {
    pcr as f64 / PCR_HZ as f64
}
