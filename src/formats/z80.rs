//! `.z80` snapshot parser (versions 1, 2 and 3)

use bitflags::bitflags;
use log::debug;

use super::snapshot::{
    read_u16, read_u16_be, PAGE_SIZE, Registers, SnapshotDescriptor, SnapshotError, UlaState,
};
use crate::machine::MachineType;

const V1_HEADER_LEN: usize = 30;
const V2_EXTRA_LEN: u16 = 23;
const V3_EXTRA_LEN: u16 = 54;
const V3_EXTRA_LEN_LONG: u16 = 55;
const UNCOMPRESSED_BLOCK: u16 = 0xFFFF;

bitflags! {
    /// Byte 12 of the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HeaderFlags: u8 {
        const R_BIT7 = 0x01;
        const BORDER = 0x0E;
        const SAMROM = 0x10;
        const COMPRESSED = 0x20;
    }
}

/// Parse a `.z80` file into a snapshot descriptor.
pub fn parse(data: &[u8]) -> Result<SnapshotDescriptor, SnapshotError> {
    if data.len() < V1_HEADER_LEN {
        return Err(SnapshotError::TooShort {
            len: data.len(),
            needed: V1_HEADER_LEN,
        });
    }

    // 255 is written by some old tools and means 1
    let flags = HeaderFlags::from_bits_retain(if data[12] == 0xFF { 1 } else { data[12] });
    let r = (data[11] & 0x7F) | if flags.contains(HeaderFlags::R_BIT7) { 0x80 } else { 0 };

    let registers = Registers {
        af: read_u16_be(data, 0),
        bc: read_u16(data, 2),
        hl: read_u16(data, 4),
        pc: read_u16(data, 6),
        sp: read_u16(data, 8),
        ir: (u16::from(data[10]) << 8) | u16::from(r),
        de: read_u16(data, 13),
        bc_: read_u16(data, 15),
        de_: read_u16(data, 17),
        hl_: read_u16(data, 19),
        af_: read_u16_be(data, 21),
        iy: read_u16(data, 23),
        ix: read_u16(data, 25),
        iff1: data[27] != 0,
        iff2: data[28] != 0,
        im: data[29] & 0x03,
    };
    let border_colour = (flags & HeaderFlags::BORDER).bits() >> 1;

    if registers.pc != 0 {
        parse_v1(data, registers, border_colour, flags)
    } else {
        parse_extended(data, registers, border_colour)
    }
}

fn parse_v1(
    data: &[u8],
    registers: Registers,
    border_colour: u8,
    flags: HeaderFlags,
) -> Result<SnapshotDescriptor, SnapshotError> {
    let body = &data[V1_HEADER_LEN..];
    let ram = if flags.contains(HeaderFlags::COMPRESSED) {
        unpack_rle(body, 3 * PAGE_SIZE, true)
    } else {
        body.to_vec()
    };
    if ram.len() < 3 * PAGE_SIZE {
        return Err(SnapshotError::TruncatedPage { page: 0 });
    }

    let mut snapshot = SnapshotDescriptor::new(MachineType::Spectrum48K);
    snapshot.registers = registers;
    snapshot.ula = UlaState {
        border_colour,
        paging_flags: 0,
    };
    for (i, page) in [5u8, 2, 0].into_iter().enumerate() {
        let start = i * PAGE_SIZE;
        snapshot
            .memory_pages
            .insert(page, ram[start..start + PAGE_SIZE].to_vec());
    }
    debug!("parsed version 1 .z80 snapshot");
    Ok(snapshot)
}

fn parse_extended(
    data: &[u8],
    mut registers: Registers,
    border_colour: u8,
) -> Result<SnapshotDescriptor, SnapshotError> {
    if data.len() < V1_HEADER_LEN + 2 {
        return Err(SnapshotError::TooShort {
            len: data.len(),
            needed: V1_HEADER_LEN + 2,
        });
    }
    let extra_len = read_u16(data, 30);
    if !matches!(extra_len, V2_EXTRA_LEN | V3_EXTRA_LEN | V3_EXTRA_LEN_LONG) {
        return Err(SnapshotError::UnsupportedVersion(extra_len));
    }
    let header_len = V1_HEADER_LEN + 2 + usize::from(extra_len);
    if data.len() < header_len {
        return Err(SnapshotError::TooShort {
            len: data.len(),
            needed: header_len,
        });
    }

    let hardware = data[34];
    let model = match (extra_len, hardware) {
        (V2_EXTRA_LEN, 0 | 1) => MachineType::Spectrum48K,
        (V2_EXTRA_LEN, 3 | 4) => MachineType::Spectrum128K,
        (V3_EXTRA_LEN | V3_EXTRA_LEN_LONG, 0 | 1 | 3) => MachineType::Spectrum48K,
        (V3_EXTRA_LEN | V3_EXTRA_LEN_LONG, 4..=6) => MachineType::Spectrum128K,
        (V2_EXTRA_LEN | V3_EXTRA_LEN | V3_EXTRA_LEN_LONG, 9) => MachineType::Pentagon128,
        (_, other) => return Err(SnapshotError::UnsupportedMachine(other)),
    };

    registers.pc = read_u16(data, 32);

    let mut snapshot = SnapshotDescriptor::new(model);
    snapshot.registers = registers;
    snapshot.ula = UlaState {
        border_colour,
        paging_flags: if model.has_paging() { data[35] } else { 0 },
    };
    if extra_len != V2_EXTRA_LEN {
        snapshot.tstates = frame_position(data, model);
    }

    let mut offset = header_len;
    while offset + 3 <= data.len() {
        let length = read_u16(data, offset);
        let file_page = data[offset + 2];
        offset += 3;

        let (contents, consumed) = if length == UNCOMPRESSED_BLOCK {
            let end = offset + PAGE_SIZE;
            let raw = data
                .get(offset..end)
                .ok_or(SnapshotError::TruncatedPage { page: file_page })?;
            (raw.to_vec(), PAGE_SIZE)
        } else {
            let end = offset + usize::from(length);
            let packed = data
                .get(offset..end)
                .ok_or(SnapshotError::TruncatedPage { page: file_page })?;
            (unpack_rle(packed, PAGE_SIZE, false), usize::from(length))
        };
        offset += consumed;

        if contents.len() != PAGE_SIZE {
            return Err(SnapshotError::TruncatedPage { page: file_page });
        }
        if let Some(page) = ram_page(model, file_page) {
            snapshot.memory_pages.insert(page, contents);
        }
    }

    debug!(
        "parsed .z80 snapshot: header extension {} bytes, model {}, {} pages",
        extra_len,
        model,
        snapshot.memory_pages.len()
    );
    Ok(snapshot)
}

/// Map a `.z80` block page number onto a RAM page; ROM blocks yield `None`.
fn ram_page(model: MachineType, file_page: u8) -> Option<u8> {
    match model {
        MachineType::Spectrum48K => match file_page {
            4 => Some(2),
            5 => Some(0),
            8 => Some(5),
            _ => None,
        },
        MachineType::Spectrum128K | MachineType::Pentagon128 => match file_page {
            3..=10 => Some(file_page - 3),
            _ => None,
        },
    }
}

/// Recover the T-state counter from the version 3 quarter-frame fields.
fn frame_position(data: &[u8], model: MachineType) -> u32 {
    let frame = model.frame_tstates();
    let quarter = frame / 4;
    let low = u32::from(read_u16(data, 55));
    let high = u32::from(data[57]);
    (((high + 1) % 4 + 1) * quarter).saturating_sub(low + 1) % frame
}

/// Expand `ED ED nn bb` runs. With `stop_at_marker` the version 1 end marker
/// `00 ED ED 00` terminates the data.
fn unpack_rle(src: &[u8], limit: usize, stop_at_marker: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(limit);
    let mut i = 0;
    while i < src.len() && out.len() < limit {
        if stop_at_marker && src[i..].starts_with(&[0x00, 0xED, 0xED, 0x00]) {
            break;
        }
        if src[i] == 0xED && src.get(i + 1) == Some(&0xED) && i + 3 < src.len() {
            let count = usize::from(src[i + 2]);
            let value = src[i + 3];
            out.extend(std::iter::repeat_n(value, count));
            i += 4;
        } else {
            out.push(src[i]);
            i += 1;
        }
    }
    out.truncate(limit);
    out
}
