//! Synthetic transport stream builder shared by the integration tests.
#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::io::Cursor;
use tsdemux::format::ts::{PESPacket, TSHeader, PAT, PMT, TS_PACKET_SIZE};
use tsdemux::format::IoSource;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

const MAX_PAYLOAD: usize = TS_PACKET_SIZE - 4;

/// Per-packet extras.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFlags {
    /// 27 MHz PCR value.
    pub pcr: Option<u64>,
    pub random_access: bool,
    pub transport_error: bool,
    /// Continuity counter to write instead of the running one.
    pub cc: Option<u8>,
}

pub struct StreamBuilder {
    buf: BytesMut,
    counters: HashMap<u16, u8>,
    fec: bool,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            counters: HashMap::new(),
            fec: false,
        }
    }

    /// Appends a 16-byte tail to every packet (204-byte packets).
    pub fn with_fec(mut self) -> Self {
        self.fec = true;
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn packet_len(&self) -> usize {
        if self.fec {
            204
        } else {
            TS_PACKET_SIZE
        }
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.counters.entry(pid).or_insert(0x0f);
        *cc = (*cc + 1) & 0x0f;
        *cc
    }

    pub fn garbage(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn packet(&mut self, pid: u16, unit_start: bool, payload: &[u8]) -> &mut Self {
        self.packet_with(pid, unit_start, payload, PacketFlags::default())
    }

    /// Writes one packet, padding short payloads with adaptation field
    /// stuffing.
    pub fn packet_with(&mut self, pid: u16, unit_start: bool, payload: &[u8], flags: PacketFlags) -> &mut Self {
        assert!(payload.len() <= MAX_PAYLOAD, "payload of {} bytes", payload.len());

        let running = self.next_cc(pid);
        let mut header = TSHeader::new(pid, unit_start, flags.cc.unwrap_or(running));
        header.transport_error = flags.transport_error;
        let needs_adaptation = payload.len() < MAX_PAYLOAD || flags.pcr.is_some() || flags.random_access;
        header.adaptation_field_exists = needs_adaptation;
        header.contains_payload = !payload.is_empty();
        header.write_to(&mut self.buf);

        if needs_adaptation {
            let length = MAX_PAYLOAD - 1 - payload.len();
            self.buf.put_u8(length as u8);
            if length > 0 {
                let mut field = vec![0xffu8; length];
                field[0] = 0x00;
                if flags.random_access {
                    field[0] |= 0x40;
                }
                if let Some(pcr) = flags.pcr {
                    assert!(length >= 7, "no room for a PCR");
                    field[0] |= 0x10;
                    let base = pcr / 300;
                    let ext = pcr % 300;
                    field[1] = (base >> 25) as u8;
                    field[2] = (base >> 17) as u8;
                    field[3] = (base >> 9) as u8;
                    field[4] = (base >> 1) as u8;
                    field[5] = ((base & 1) << 7) as u8 | 0x7e | (ext >> 8) as u8;
                    field[6] = ext as u8;
                }
                self.buf.put_slice(&field);
            }
        }
        self.buf.put_slice(payload);

        if self.fec {
            self.buf.put_bytes(0x00, 16);
        }
        self
    }

    /// Writes a complete section behind a zero pointer field.
    pub fn section(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let mut data = vec![0x00];
        data.extend_from_slice(section);
        for (i, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            self.packet(pid, i == 0, chunk);
        }
        self
    }

    pub fn pat(&mut self, pat: &PAT) -> &mut Self {
        let mut section = BytesMut::new();
        pat.write_section(&mut section);
        self.section(0x0000, &section)
    }

    pub fn pmt(&mut self, pid: u16, pmt: &PMT) -> &mut Self {
        let mut section = BytesMut::new();
        pmt.write_section(&mut section);
        self.section(pid, &section)
    }

    /// Splits a PES packet evenly over exactly `packets` transport packets.
    pub fn pes(&mut self, pid: u16, pes: &PESPacket, packets: usize) -> &mut Self {
        self.pes_with(pid, pes, packets, PacketFlags::default())
    }

    /// Like [`pes`](Self::pes); `flags` apply to the first packet.
    pub fn pes_with(&mut self, pid: u16, pes: &PESPacket, packets: usize, flags: PacketFlags) -> &mut Self {
        let mut data = BytesMut::new();
        pes.write_to(&mut data);

        let base = data.len() / packets;
        let extra = data.len() % packets;
        assert!(base >= 19 && base + 1 <= MAX_PAYLOAD - 8, "{} bytes over {} packets", data.len(), packets);

        let mut offset = 0;
        for i in 0..packets {
            let len = base + usize::from(i < extra);
            let chunk = &data[offset..offset + len];
            if i == 0 {
                self.packet_with(pid, true, chunk, flags);
            } else {
                self.packet(pid, false, chunk);
            }
            offset += len;
        }
        self
    }

    /// Splits a PES packet at the given byte offsets, one transport packet
    /// per piece.
    pub fn pes_at(&mut self, pid: u16, pes: &PESPacket, cuts: &[usize]) -> &mut Self {
        let mut data = BytesMut::new();
        pes.write_to(&mut data);

        let mut bounds = vec![0];
        bounds.extend_from_slice(cuts);
        bounds.push(data.len());
        for (i, piece) in bounds.windows(2).enumerate() {
            self.packet(pid, i == 0, &data[piece[0]..piece[1]]);
        }
        self
    }

    /// Writes a PES packet in as few transport packets as possible.
    pub fn pes_packed(&mut self, pid: u16, pes: &PESPacket) -> &mut Self {
        let mut data = BytesMut::new();
        pes.write_to(&mut data);
        for (i, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            self.packet(pid, i == 0, chunk);
        }
        self
    }

    pub fn null_packets(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.packet(0x1fff, false, &[0xff; MAX_PAYLOAD]);
        }
        self
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn source(&self) -> IoSource<Cursor<Vec<u8>>> {
        IoSource::new(Cursor::new(self.to_vec())).expect("in-memory source")
    }
}

/// PAT with one program (1) whose PMT is on [`PMT_PID`].
pub fn single_program_pat() -> PAT {
    PAT::new(1).with_program(1, PMT_PID)
}
