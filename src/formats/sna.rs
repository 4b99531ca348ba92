//! `.sna` snapshot parser (48K and 128K layouts)

use log::debug;

use super::snapshot::{
    read_u16, take_page, PAGE_SIZE, Registers, SnapshotDescriptor, SnapshotError, UlaState,
};
use crate::machine::MachineType;

const HEADER_LEN: usize = 27;
const LEN_48K: usize = HEADER_LEN + 3 * PAGE_SIZE;
/// 128K files carry 5 or 6 extra pages depending on whether the paged-in
/// bank is one of 2 and 5.
const LEN_128K_SHORT: usize = LEN_48K + 4 + 5 * PAGE_SIZE;
const LEN_128K_LONG: usize = LEN_48K + 4 + 6 * PAGE_SIZE;

/// Parse a `.sna` file into a snapshot descriptor.
pub fn parse(data: &[u8]) -> Result<SnapshotDescriptor, SnapshotError> {
    let model = match data.len() {
        LEN_48K => MachineType::Spectrum48K,
        LEN_128K_SHORT | LEN_128K_LONG => MachineType::Spectrum128K,
        n if n < LEN_48K => {
            return Err(SnapshotError::TooShort {
                len: n,
                needed: LEN_48K,
            });
        }
        n => return Err(SnapshotError::BadLength(n)),
    };

    let mut registers = Registers {
        ir: (u16::from(data[0]) << 8) | u16::from(data[20]),
        hl_: read_u16(data, 1),
        de_: read_u16(data, 3),
        bc_: read_u16(data, 5),
        af_: read_u16(data, 7),
        hl: read_u16(data, 9),
        de: read_u16(data, 11),
        bc: read_u16(data, 13),
        iy: read_u16(data, 15),
        ix: read_u16(data, 17),
        iff1: data[19] & 0x04 != 0,
        iff2: data[19] & 0x04 != 0,
        af: read_u16(data, 21),
        sp: read_u16(data, 23),
        im: data[25] & 0x03,
        pc: 0,
    };

    let mut snapshot = SnapshotDescriptor::new(model);
    snapshot.memory_pages.insert(5, take_page(data, HEADER_LEN, 5)?);
    snapshot
        .memory_pages
        .insert(2, take_page(data, HEADER_LEN + PAGE_SIZE, 2)?);

    match model {
        MachineType::Spectrum48K => {
            snapshot
                .memory_pages
                .insert(0, take_page(data, HEADER_LEN + 2 * PAGE_SIZE, 0)?);
            // PC sits on the stack: pop it
            registers.pc = peek_u16(&snapshot, registers.sp);
            registers.sp = registers.sp.wrapping_add(2);
            snapshot.ula = UlaState {
                border_colour: data[26] & 0x07,
                paging_flags: 0,
            };
        }
        MachineType::Spectrum128K | MachineType::Pentagon128 => {
            let trailer = LEN_48K;
            registers.pc = read_u16(data, trailer);
            let paging = data[trailer + 2];
            let paged_bank = paging & 0x07;
            snapshot.memory_pages.insert(
                paged_bank,
                take_page(data, HEADER_LEN + 2 * PAGE_SIZE, paged_bank)?,
            );

            let mut offset = trailer + 4;
            for bank in [0u8, 1, 3, 4, 6, 7] {
                if bank == paged_bank {
                    continue;
                }
                snapshot
                    .memory_pages
                    .insert(bank, take_page(data, offset, bank)?);
                offset += PAGE_SIZE;
            }
            snapshot.ula = UlaState {
                border_colour: data[26] & 0x07,
                paging_flags: paging,
            };
        }
    }

    snapshot.registers = registers;
    debug!(
        "parsed .sna snapshot: model {}, PC {:#06X}",
        model, snapshot.registers.pc
    );
    Ok(snapshot)
}

/// Read a word from the snapshot's 48K address space (0x4000..=0xFFFF).
fn peek_u16(snapshot: &SnapshotDescriptor, addr: u16) -> u16 {
    let lo = peek(snapshot, addr);
    let hi = peek(snapshot, addr.wrapping_add(1));
    u16::from(lo) | (u16::from(hi) << 8)
}

fn peek(snapshot: &SnapshotDescriptor, addr: u16) -> u8 {
    let page = match addr >> 14 {
        1 => 5,
        2 => 2,
        3 => 0,
        _ => return 0xFF,
    };
    snapshot
        .page(page)
        .map_or(0xFF, |bytes| bytes[usize::from(addr) & (PAGE_SIZE - 1)])
}
