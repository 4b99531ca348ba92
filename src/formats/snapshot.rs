//! Machine state descriptors produced by the snapshot parsers.
//!
//! A [`SnapshotDescriptor`] is self-describing: it names the model it was
//! taken from and carries every 16K RAM page it contains, so the worker can
//! restore it without knowing which file format it came from.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::machine::MachineType;

/// Size of one RAM page
pub const PAGE_SIZE: usize = 0x4000;

/// Z80 register file as captured in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_: u16,
    pub bc_: u16,
    pub de_: u16,
    pub hl_: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    /// I in the high byte, R in the low byte
    pub ir: u16,
    pub im: u8,
    pub iff1: bool,
    pub iff2: bool,
}

/// ULA-side state outside the CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UlaState {
    pub border_colour: u8,
    /// Last value written to port 0x7FFD (0 on the 48K)
    pub paging_flags: u8,
}

/// A fully parsed snapshot, ready to hand to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescriptor {
    pub model: MachineType,
    pub registers: Registers,
    pub ula: UlaState,
    /// RAM page number -> 16K of page contents
    pub memory_pages: BTreeMap<u8, Vec<u8>>,
    /// T-state position within the frame
    pub tstates: u32,
}

impl SnapshotDescriptor {
    pub fn new(model: MachineType) -> Self {
        Self {
            model,
            registers: Registers::default(),
            ula: UlaState::default(),
            memory_pages: BTreeMap::new(),
            tstates: 0,
        }
    }

    pub fn page(&self, page: u8) -> Option<&[u8]> {
        self.memory_pages.get(&page).map(Vec::as_slice)
    }
}

/// Failures while decoding a snapshot file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("file is too short ({len} bytes, need at least {needed})")]
    TooShort { len: usize, needed: usize },
    #[error("unexpected file length {0}")]
    BadLength(usize),
    #[error("missing '{0}' signature")]
    BadSignature(&'static str),
    #[error("unsupported machine type {0}")]
    UnsupportedMachine(u8),
    #[error("unsupported .z80 header length {0}")]
    UnsupportedVersion(u16),
    #[error("RAM page {0} is out of range")]
    InvalidPage(u8),
    #[error("memory page {page} is truncated")]
    TruncatedPage { page: u8 },
    #[error("block '{0}' runs past the end of the file")]
    TruncatedBlock(String),
    #[error("snapshot has no CPU registers")]
    MissingRegisters,
    #[error("could not decompress page {page}: {reason}")]
    Decompress { page: u8, reason: String },
}

/// Copy a 16K page out of `data` starting at `offset`.
pub(crate) fn take_page(data: &[u8], offset: usize, page: u8) -> Result<Vec<u8>, SnapshotError> {
    data.get(offset..offset + PAGE_SIZE)
        .map(<[u8]>::to_vec)
        .ok_or(SnapshotError::TruncatedPage { page })
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a register pair stored high byte first (A then F in the snapshot headers).
pub(crate) fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
