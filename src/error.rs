// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Errors surfaced by load operations

use thiserror::Error;

use crate::formats::snapshot::SnapshotError;
use crate::formats::tape::TapeError;
use crate::protocol::LoadId;

/// Why a load request failed.
///
/// Everything except `WorkerUnavailable` and `Abandoned` is a classification
/// error: it is reported before anything is sent to the worker.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unrecognized file type: {0}")]
    UnrecognizedFileType(String),
    #[error("invalid TAP file: {0}")]
    InvalidTap(TapeError),
    #[error("invalid TZX file: {0}")]
    InvalidTzx(TapeError),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),
    #[error("no loadable file found inside archive {0}")]
    NoLoadableFile(String),
    #[error("multiple loadable files found inside archive {archive}: {}", candidates.join(", "))]
    AmbiguousArchive {
        archive: String,
        candidates: Vec<String>,
    },
    #[error("archive {0} is nested too deeply")]
    ArchiveTooDeep(String),
    #[error("could not read archive {name}: {reason}")]
    Archive { name: String, reason: String },
    #[error("failed to fetch {location}: {reason}")]
    Fetch { location: String, reason: String },
    #[error("compute worker is unavailable")]
    WorkerUnavailable,
    #[error("load {0} was abandoned before the worker answered")]
    Abandoned(LoadId),
}

impl LoadError {
    /// True for errors detected on the host before contacting the worker.
    pub fn is_classification(&self) -> bool {
        !matches!(self, LoadError::WorkerUnavailable | LoadError::Abandoned(_))
    }
}
