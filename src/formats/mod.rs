// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! File classification: maps a file name and its bytes onto the worker
//! request that loads it.

pub mod archive;
pub mod sna;
pub mod snapshot;
pub mod szx;
pub mod tape;
pub mod z80;

use log::debug;

use crate::error::LoadError;
use crate::protocol::LoadKind;
pub use snapshot::SnapshotDescriptor;

/// Formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Z80,
    Szx,
    Sna,
    Tap,
    Tzx,
    Zip,
}

impl FileFormat {
    /// Pick a format from the (case-insensitive) extension of `name`.
    pub fn from_name(name: &str) -> Option<Self> {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let (_, extension) = file_name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "z80" => Some(FileFormat::Z80),
            "szx" => Some(FileFormat::Szx),
            "sna" => Some(FileFormat::Sna),
            "tap" => Some(FileFormat::Tap),
            "tzx" => Some(FileFormat::Tzx),
            "zip" => Some(FileFormat::Zip),
            _ => None,
        }
    }
}

/// What to send to the worker for a classified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Snapshot(SnapshotDescriptor),
    Tap(Vec<u8>),
    Tzx(Vec<u8>),
}

impl Dispatch {
    pub fn load_kind(&self) -> LoadKind {
        match self {
            Dispatch::Snapshot(_) => LoadKind::Snapshot,
            Dispatch::Tap(_) => LoadKind::TapePayload,
            Dispatch::Tzx(_) => LoadKind::RawTape,
        }
    }
}

/// Classify a file by name, parsing or validating its contents.
pub fn classify(name: &str, data: Vec<u8>) -> Result<Dispatch, LoadError> {
    classify_at(name, data, 0)
}

pub(crate) fn classify_at(name: &str, data: Vec<u8>, depth: usize) -> Result<Dispatch, LoadError> {
    let format =
        FileFormat::from_name(name).ok_or_else(|| LoadError::UnrecognizedFileType(name.into()))?;
    debug!("classifying {} as {:?} ({} bytes)", name, format, data.len());

    match format {
        FileFormat::Z80 => Ok(Dispatch::Snapshot(z80::parse(&data)?)),
        FileFormat::Szx => Ok(Dispatch::Snapshot(szx::parse(&data)?)),
        FileFormat::Sna => Ok(Dispatch::Snapshot(sna::parse(&data)?)),
        FileFormat::Tap => {
            tape::validate_tap(&data).map_err(LoadError::InvalidTap)?;
            Ok(Dispatch::Tap(data))
        }
        FileFormat::Tzx => {
            tape::validate_tzx(&data).map_err(LoadError::InvalidTzx)?;
            Ok(Dispatch::Tzx(data))
        }
        FileFormat::Zip => archive::resolve(name, &data, depth),
    }
}
