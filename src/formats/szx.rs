//! `.szx` (ZX-State) snapshot parser.
//!
//! An SZX file is an 8-byte header followed by tagged blocks. Only the
//! blocks needed to rebuild machine state are interpreted:
//! - `Z80R`: CPU registers and the T-state counter
//! - `SPCR`: border colour and the 0x7FFD paging latch
//! - `RAMP`: one 16K RAM page, optionally zlib-compressed
//!
//! Every other block is skipped.

use std::io::Read;

use bitflags::bitflags;
use flate2::read::ZlibDecoder;
use log::{debug, trace};

use super::snapshot::{
    read_u16, read_u32, PAGE_SIZE, Registers, SnapshotDescriptor, SnapshotError,
};
use crate::machine::MachineType;

const SIGNATURE: &[u8; 4] = b"ZXST";
const HEADER_LEN: usize = 8;
const BLOCK_HEADER_LEN: usize = 8;
const Z80R_LEN: usize = 37;
const SPCR_LEN: usize = 8;
const RAMP_HEADER_LEN: usize = 3;
const LAST_RAM_PAGE: u8 = 7;

const MACHINE_48K: u8 = 1;
const MACHINE_128K: u8 = 2;
const MACHINE_PLUS2: u8 = 3;
const MACHINE_PENTAGON: u8 = 7;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct RampFlags: u16 {
        const COMPRESSED = 0x0001;
    }
}

/// Parse an `.szx` file into a snapshot descriptor.
pub fn parse(data: &[u8]) -> Result<SnapshotDescriptor, SnapshotError> {
    if data.len() < HEADER_LEN {
        return Err(SnapshotError::TooShort {
            len: data.len(),
            needed: HEADER_LEN,
        });
    }
    if &data[0..4] != SIGNATURE {
        return Err(SnapshotError::BadSignature("ZXST"));
    }
    let model = match data[6] {
        MACHINE_48K => MachineType::Spectrum48K,
        MACHINE_128K | MACHINE_PLUS2 => MachineType::Spectrum128K,
        MACHINE_PENTAGON => MachineType::Pentagon128,
        other => return Err(SnapshotError::UnsupportedMachine(other)),
    };

    let mut snapshot = SnapshotDescriptor::new(model);
    let mut seen_registers = false;
    let mut offset = HEADER_LEN;

    while offset + BLOCK_HEADER_LEN <= data.len() {
        let id = &data[offset..offset + 4];
        let size = read_u32(data, offset + 4) as usize;
        let start = offset + BLOCK_HEADER_LEN;
        let body = data
            .get(start..start.saturating_add(size))
            .ok_or_else(|| SnapshotError::TruncatedBlock(block_name(id)))?;

        match id {
            b"Z80R" => {
                read_registers(&mut snapshot, body)?;
                seen_registers = true;
            }
            b"SPCR" => {
                if body.len() < SPCR_LEN {
                    return Err(SnapshotError::TruncatedBlock(block_name(id)));
                }
                snapshot.ula.border_colour = body[0] & 0x07;
                if model.has_paging() {
                    snapshot.ula.paging_flags = body[1];
                }
            }
            b"RAMP" => {
                let (page, contents) = read_ram_page(body)?;
                snapshot.memory_pages.insert(page, contents);
            }
            _ => trace!("skipping SZX block '{}' ({} bytes)", block_name(id), size),
        }
        offset = start + size;
    }

    if !seen_registers {
        return Err(SnapshotError::MissingRegisters);
    }
    debug!(
        "parsed .szx snapshot: model {}, {} pages",
        model,
        snapshot.memory_pages.len()
    );
    Ok(snapshot)
}

fn read_registers(snapshot: &mut SnapshotDescriptor, body: &[u8]) -> Result<(), SnapshotError> {
    if body.len() < Z80R_LEN {
        return Err(SnapshotError::TruncatedBlock("Z80R".into()));
    }
    snapshot.registers = Registers {
        af: read_u16(body, 0),
        bc: read_u16(body, 2),
        de: read_u16(body, 4),
        hl: read_u16(body, 6),
        af_: read_u16(body, 8),
        bc_: read_u16(body, 10),
        de_: read_u16(body, 12),
        hl_: read_u16(body, 14),
        ix: read_u16(body, 16),
        iy: read_u16(body, 18),
        sp: read_u16(body, 20),
        pc: read_u16(body, 22),
        ir: (u16::from(body[24]) << 8) | u16::from(body[25]),
        iff1: body[26] != 0,
        iff2: body[27] != 0,
        im: body[28] & 0x03,
    };
    snapshot.tstates = read_u32(body, 29) % snapshot.model.frame_tstates();
    Ok(())
}

fn read_ram_page(body: &[u8]) -> Result<(u8, Vec<u8>), SnapshotError> {
    if body.len() < RAMP_HEADER_LEN {
        return Err(SnapshotError::TruncatedBlock("RAMP".into()));
    }
    let flags = RampFlags::from_bits_retain(read_u16(body, 0));
    let page = body[2];
    if page > LAST_RAM_PAGE {
        return Err(SnapshotError::InvalidPage(page));
    }
    let payload = &body[RAMP_HEADER_LEN..];

    let contents = if flags.contains(RampFlags::COMPRESSED) {
        let mut out = Vec::with_capacity(PAGE_SIZE);
        ZlibDecoder::new(payload)
            .take(PAGE_SIZE as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| SnapshotError::Decompress {
                page,
                reason: e.to_string(),
            })?;
        out
    } else {
        payload.to_vec()
    };

    if contents.len() != PAGE_SIZE {
        return Err(SnapshotError::TruncatedPage { page });
    }
    Ok((page, contents))
}

fn block_name(id: &[u8]) -> String {
    String::from_utf8_lossy(id).into_owned()
}
