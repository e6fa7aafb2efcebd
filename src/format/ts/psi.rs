//! PAT and PMT section decoders.
//!
//! Both decoders take one complete section (table_id through CRC) as
//! produced by [`SectionBuffer`](super::section::SectionBuffer) and either
//! return the whole table or reject the whole section.

use super::types::*;
use crate::av::StreamType;
use crate::error::TableError;
use crate::utils::{BitReader, Crc32Mpeg2};
use log::debug;

/// Decodes the long-form header and returns it with the table body, which
/// excludes the 8 header bytes and the trailing CRC.
pub fn parse_section_header(section: &[u8]) -> Result<(SectionHeader, &[u8]), TableError> {
    if section.len() < 3 {
        return Err(TableError::SectionTooShort(section.len()));
    }
    let total = ((((section[1] as usize) & 0x0f) << 8) | section[2] as usize) + 3;
    if total > section.len() {
        return Err(TableError::LengthOverflow {
            declared: total,
            available: section.len(),
        });
    }
    if total < SectionHeader::SIZE + 4 {
        return Err(TableError::SectionTooShort(total));
    }

    let short = |_| TableError::SectionTooShort(total);
    let mut reader = BitReader::new(&section[..SectionHeader::SIZE]);
    let table_id = reader.read_u8().map_err(short)?;
    let section_syntax_indicator = reader.read_bit().map_err(short)?;
    reader.skip_bits(3).map_err(short)?;
    let section_length = reader.read_bits(12).map_err(short)? as u16;
    let table_id_extension = reader.read_u16().map_err(short)?;
    reader.skip_bits(2).map_err(short)?;
    let version_number = reader.read_bits(5).map_err(short)? as u8;
    let current_next = reader.read_bit().map_err(short)?;
    let section_number = reader.read_u8().map_err(short)?;
    let last_section_number = reader.read_u8().map_err(short)?;

    let header = SectionHeader {
        table_id,
        section_syntax_indicator,
        section_length,
        table_id_extension,
        version_number,
        current_next,
        section_number,
        last_section_number,
    };
    Ok((header, &section[SectionHeader::SIZE..total - 4]))
}

fn check_header(header: &SectionHeader, expected_table_id: u8) -> Result<(), TableError> {
    if header.table_id != expected_table_id {
        return Err(TableError::WrongTableId {
            expected: expected_table_id,
            found: header.table_id,
        });
    }
    if !header.current_next {
        return Err(TableError::NotCurrent);
    }
    if header.section_number != 0 || header.last_section_number != 0 {
        debug!(
            "table 0x{:02x}: section {}/{}, only this section is decoded",
            header.table_id, header.section_number, header.last_section_number
        );
    }
    Ok(())
}

/// Checks the CRC-32 trailing a complete section.
pub fn verify_crc(crc: &Crc32Mpeg2, section: &[u8]) -> Result<(), TableError> {
    let (header, _) = parse_section_header(section)?;
    let total = header.section_length as usize + 3;
    let section = &section[..total];
    if crc.verify(section) {
        return Ok(());
    }
    let stored = u32::from_be_bytes([
        section[total - 4],
        section[total - 3],
        section[total - 2],
        section[total - 1],
    ]);
    Err(TableError::CrcMismatch {
        expected: stored,
        actual: crc.calculate(&section[..total - 4]),
    })
}

/// Decodes a PAT section into its program → PMT PID entries.
///
/// Program 0 announces the network PID and is not listed.
pub fn parse_pat(section: &[u8]) -> Result<PAT, TableError> {
    let (header, body) = parse_section_header(section)?;
    check_header(&header, TABLE_ID_PAT)?;

    let entries = body
        .chunks_exact(4)
        .filter_map(|entry| {
            let program_number = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = ((entry[2] as u16 & 0x1f) << 8) | entry[3] as u16;
            (program_number != 0).then_some(PATEntry {
                program_number,
                program_map_pid: pid,
            })
        })
        .collect();

    Ok(PAT { header, entries })
}

/// Decodes the PMT section of `program_number`.
pub fn parse_pmt(section: &[u8], program_number: u16) -> Result<PMT, TableError> {
    let (header, body) = parse_section_header(section)?;
    check_header(&header, TABLE_ID_PMT)?;
    if header.table_id_extension != program_number {
        return Err(TableError::ProgramMismatch {
            expected: program_number,
            found: header.table_id_extension,
        });
    }

    let short = |_| TableError::SectionTooShort(section.len());
    let mut reader = BitReader::new(body);
    reader.skip_bits(3).map_err(short)?;
    let pcr_pid = reader.read_bits(13).map_err(short)? as u16;
    reader.skip_bits(4).map_err(short)?;
    let program_info_length = reader.read_bits(12).map_err(short)? as usize;
    let program_descriptors = read_descriptors(&mut reader, program_info_length)?;

    let mut elementary_stream_infos = Vec::new();
    while reader.remaining_bytes() >= 5 {
        let stream_type = reader.read_u8().map_err(short)?;
        reader.skip_bits(3).map_err(short)?;
        let elementary_pid = reader.read_bits(13).map_err(short)? as u16;
        reader.skip_bits(4).map_err(short)?;
        let es_info_length = reader.read_bits(12).map_err(short)? as usize;
        let descriptors = read_descriptors(&mut reader, es_info_length)?;

        let resolved = resolve_stream_type(stream_type, &descriptors);
        elementary_stream_infos.push(ElementaryStreamInfo {
            stream_type,
            elementary_pid,
            descriptors,
            resolved,
        });
    }

    Ok(PMT {
        header,
        pcr_pid,
        program_descriptors,
        elementary_stream_infos,
    })
}

fn read_descriptors(reader: &mut BitReader<'_>, length: usize) -> Result<Vec<Descriptor>, TableError> {
    let data = reader
        .read_slice(length)
        .map_err(|_| TableError::DescriptorOverflow)?;

    let mut descriptors = Vec::new();
    let mut loop_reader = BitReader::new(data);
    while loop_reader.remaining_bytes() > 0 {
        let overflow = |_| TableError::DescriptorOverflow;
        let tag = loop_reader.read_u8().map_err(overflow)?;
        let len = loop_reader.read_u8().map_err(overflow)? as usize;
        let data = loop_reader.read_slice(len).map_err(overflow)?;
        descriptors.push(Descriptor {
            tag,
            data: data.to_vec(),
        });
    }
    Ok(descriptors)
}

/// Maps a PMT stream_type byte to a codec family.
///
/// Stream type 6 (private PES) is only AC-3 when an ES descriptor says so.
pub fn resolve_stream_type(stream_type: u8, descriptors: &[Descriptor]) -> StreamType {
    match stream_type {
        0x01 => StreamType::VideoMpeg1,
        0x02 => StreamType::VideoMpeg2,
        0x03 | 0x04 => StreamType::AudioMp2,
        0x06 if declares_ac3(descriptors) => StreamType::AudioAc3,
        0x06 => StreamType::Unknown,
        0x0f | 0x11 => StreamType::AudioAac,
        0x10 => StreamType::VideoMpeg4,
        0x1b => StreamType::VideoH264,
        0x81 => StreamType::AudioAc3,
        _ => StreamType::Unknown,
    }
}

fn declares_ac3(descriptors: &[Descriptor]) -> bool {
    descriptors.iter().any(|d| match d.tag {
        DESCRIPTOR_DVB_AC3 => true,
        DESCRIPTOR_REGISTRATION => d.data.starts_with(b"AC-3"),
        _ => false,
    })
}
