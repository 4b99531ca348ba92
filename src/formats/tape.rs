//! Structural validation for `.tap` and `.tzx` tape images.
//!
//! The worker does the actual tape playback; the host only checks that a
//! file is well-formed before handing it over.

use thiserror::Error;

const TZX_SIGNATURE: &[u8; 8] = b"ZXTape!\x1A";
const TZX_HEADER_LEN: usize = 10;

/// Reasons a tape image is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TapeError {
    #[error("block at offset {offset} has a truncated length word")]
    TruncatedLength { offset: usize },
    #[error("block at offset {offset} runs past the end of the file")]
    TruncatedBlock { offset: usize },
    #[error("missing 'ZXTape!' signature")]
    BadSignature,
    #[error("unsupported TZX major version {0}")]
    UnsupportedVersion(u8),
}

/// Walk the length-prefixed block chain of a `.tap` file; the last block must
/// end exactly at EOF. Returns the number of blocks.
pub fn validate_tap(data: &[u8]) -> Result<usize, TapeError> {
    let mut offset = 0;
    let mut blocks = 0;
    while offset < data.len() {
        if offset + 1 >= data.len() {
            return Err(TapeError::TruncatedLength { offset });
        }
        let length = usize::from(u16::from_le_bytes([data[offset], data[offset + 1]]));
        if offset + 2 + length > data.len() {
            return Err(TapeError::TruncatedBlock { offset });
        }
        offset += 2 + length;
        blocks += 1;
    }
    Ok(blocks)
}

/// Check the TZX header and walk every block. Returns the number of blocks.
pub fn validate_tzx(data: &[u8]) -> Result<usize, TapeError> {
    if data.len() < TZX_HEADER_LEN || &data[..8] != TZX_SIGNATURE {
        return Err(TapeError::BadSignature);
    }
    if data[8] != 1 {
        return Err(TapeError::UnsupportedVersion(data[8]));
    }

    let mut offset = TZX_HEADER_LEN;
    let mut blocks = 0;
    while offset < data.len() {
        let body = offset + 1;
        let length = tzx_block_length(data[offset], &data[body..])
            .ok_or(TapeError::TruncatedBlock { offset })?;
        if body + length > data.len() {
            return Err(TapeError::TruncatedBlock { offset });
        }
        offset = body + length;
        blocks += 1;
    }
    Ok(blocks)
}

/// Size of a TZX block body (everything after the id byte), or `None` when
/// the length fields themselves are cut off.
fn tzx_block_length(id: u8, body: &[u8]) -> Option<usize> {
    let byte = |at: usize| body.get(at).copied().map(usize::from);
    let word = |at: usize| Some(byte(at)? | (byte(at + 1)? << 8));
    let triple = |at: usize| Some(word(at)? | (byte(at + 2)? << 16));
    let dword = |at: usize| Some(word(at)? | (word(at + 2)? << 16));

    Some(match id {
        0x10 => 0x04 + word(0x02)?,
        0x11 => 0x12 + triple(0x0F)?,
        0x12 => 0x04,
        0x13 => 0x01 + 2 * byte(0)?,
        0x14 => 0x0A + triple(0x07)?,
        0x15 => 0x08 + triple(0x05)?,
        0x18 | 0x19 | 0x2B => 0x04 + dword(0)?,
        0x20 | 0x23 | 0x24 => 0x02,
        0x21 | 0x30 => 0x01 + byte(0)?,
        0x22 | 0x25 | 0x27 => 0x00,
        0x26 => 0x02 + 2 * word(0)?,
        0x28 | 0x32 => 0x02 + word(0)?,
        0x2A => 0x04,
        0x31 => 0x02 + byte(1)?,
        0x33 => 0x01 + 3 * byte(0)?,
        0x34 => 0x08,
        0x35 => 0x14 + dword(0x10)?,
        0x40 => 0x04 + triple(0x01)?,
        0x5A => 0x09,
        // Unknown blocks follow the extension rule: a 32-bit length first
        _ => 0x04 + dword(0)?,
    })
}
