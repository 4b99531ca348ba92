// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Emulated machine models, ROM layout and tape auto-loader selection

use std::fmt;
use std::str::FromStr;

/// Spectrum models the compute worker can emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-config", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde-config", serde(from = "u32", into = "u32"))]
pub enum MachineType {
    #[default]
    Spectrum48K,
    Spectrum128K,
    Pentagon128,
}

impl MachineType {
    /// Numeric codes used on the worker protocol
    pub const CODE_48K: u32 = 48;
    pub const CODE_128K: u32 = 128;
    pub const CODE_PENTAGON: u32 = 5;

    /// Map a protocol code onto a machine; unknown codes fall back to the 48K.
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::CODE_128K => MachineType::Spectrum128K,
            Self::CODE_PENTAGON => MachineType::Pentagon128,
            _ => MachineType::Spectrum48K,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            MachineType::Spectrum48K => Self::CODE_48K,
            MachineType::Spectrum128K => Self::CODE_128K,
            MachineType::Pentagon128 => Self::CODE_PENTAGON,
        }
    }

    /// T-states in one video frame
    pub fn frame_tstates(self) -> u32 {
        match self {
            MachineType::Spectrum48K => 69_888,
            MachineType::Spectrum128K => 70_908,
            MachineType::Pentagon128 => 71_680,
        }
    }

    /// Whether the model has the 128K paging port at 0x7FFD.
    pub fn has_paging(self) -> bool {
        !matches!(self, MachineType::Spectrum48K)
    }

    /// Bootstrap snapshot that types the tape loading command for this model.
    pub fn tape_loader(self, mode: TapeAutoLoadMode) -> &'static str {
        match (self, mode) {
            (MachineType::Spectrum48K, _) => "tapeloaders/tape_48.szx",
            (MachineType::Spectrum128K, TapeAutoLoadMode::Default) => "tapeloaders/tape_128.szx",
            (MachineType::Spectrum128K, TapeAutoLoadMode::Usr0) => {
                "tapeloaders/tape_128_usr0.szx"
            }
            (MachineType::Pentagon128, TapeAutoLoadMode::Default) => {
                "tapeloaders/tape_pentagon.szx"
            }
            (MachineType::Pentagon128, TapeAutoLoadMode::Usr0) => {
                "tapeloaders/tape_pentagon_usr0.szx"
            }
        }
    }
}

impl From<u32> for MachineType {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<MachineType> for u32 {
    fn from(machine: MachineType) -> Self {
        machine.code()
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::Spectrum48K => write!(f, "48K"),
            MachineType::Spectrum128K => write!(f, "128K"),
            MachineType::Pentagon128 => write!(f, "Pentagon 128"),
        }
    }
}

/// How the tape auto-loader starts a freshly inserted tape.
///
/// `Usr0` drops a 128K-family machine into 48 BASIC first, which some
/// titles need; the 48K has a single loader for both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-config", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "lowercase"))]
pub enum TapeAutoLoadMode {
    #[default]
    Default,
    Usr0,
}

/// Error returned when parsing an unknown auto-load mode name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown tape auto-load mode '{0}' (expected 'default' or 'usr0')")]
pub struct UnknownTapeMode(pub String);

impl FromStr for TapeAutoLoadMode {
    type Err = UnknownTapeMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(TapeAutoLoadMode::Default),
            "usr0" => Ok(TapeAutoLoadMode::Usr0),
            _ => Err(UnknownTapeMode(s.to_string())),
        }
    }
}

impl fmt::Display for TapeAutoLoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapeAutoLoadMode::Default => write!(f, "default"),
            TapeAutoLoadMode::Usr0 => write!(f, "usr0"),
        }
    }
}

/// ROM images installed into the worker once it reports ready, as
/// (asset location, memory page).
pub const ROM_PAGES: &[(&str, u8)] = &[
    ("roms/128-0.rom", 8),
    ("roms/128-1.rom", 9),
    ("roms/48.rom", 10),
    ("roms/pentagon-0.rom", 12),
    ("roms/trdos.rom", 13),
];
