// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message vocabulary between the host and the compute worker.
//!
//! Buffers travel inside the messages by value: posting a [`HostMessage::RunFrame`]
//! moves the video and audio buffers to the worker, and the matching
//! [`WorkerMessage::FrameCompleted`] moves them back. Neither side can touch a
//! buffer while the other one owns it.

use std::fmt;

use crate::formats::SnapshotDescriptor;
use crate::machine::MachineType;

/// Correlation id tying a load request to its `FileOpened` reply.
pub type LoadId = u64;

/// What a completed load turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Snapshot,
    Tape,
}

/// Which request produced a pending load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    Snapshot,
    /// `.tap` block stream
    TapePayload,
    /// `.tzx` container
    RawTape,
}

/// Left/right sample buffers for one frame of audio.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffers {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl AudioBuffers {
    pub fn with_len(samples: usize) -> Self {
        Self {
            left: vec![0.0; samples],
            right: vec![0.0; samples],
        }
    }
}

/// The buffer set owned by whichever side is currently working on a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameBuffers {
    pub video: Vec<u8>,
    pub audio: Option<AudioBuffers>,
}

/// Host -> worker.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// Bootstrap the emulation core from `base_url`.
    LoadCore { base_url: String },
    /// Copy `data` into memory page `page` (ROM installation).
    LoadMemory { data: Vec<u8>, page: u8 },
    SetMachineType { machine: MachineType },
    Reset,
    RunFrame(FrameBuffers),
    LoadSnapshot {
        id: LoadId,
        snapshot: Box<SnapshotDescriptor>,
    },
    OpenTapFile { id: LoadId, data: Vec<u8> },
    OpenTzxFile { id: LoadId, data: Vec<u8> },
    /// Stop the worker; nothing more will be sent.
    Terminate,
}

impl HostMessage {
    /// Message name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            HostMessage::LoadCore { .. } => "loadCore",
            HostMessage::LoadMemory { .. } => "loadMemory",
            HostMessage::SetMachineType { .. } => "setMachineType",
            HostMessage::Reset => "reset",
            HostMessage::RunFrame(_) => "runFrame",
            HostMessage::LoadSnapshot { .. } => "loadSnapshot",
            HostMessage::OpenTapFile { .. } => "openTAPFile",
            HostMessage::OpenTzxFile { .. } => "openTZXFile",
            HostMessage::Terminate => "terminate",
        }
    }

    /// Correlation id carried by load requests.
    pub fn load_id(&self) -> Option<LoadId> {
        match self {
            HostMessage::LoadSnapshot { id, .. }
            | HostMessage::OpenTapFile { id, .. }
            | HostMessage::OpenTzxFile { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Worker -> host.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// The core finished bootstrapping.
    Ready,
    FrameCompleted(FrameBuffers),
    FileOpened { id: LoadId, media_type: MediaType },
}

impl fmt::Display for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMessage::Ready => write!(f, "ready"),
            WorkerMessage::FrameCompleted(buffers) => write!(
                f,
                "frameCompleted({} video bytes, audio: {})",
                buffers.video.len(),
                buffers.audio.is_some()
            ),
            WorkerMessage::FileOpened { id, media_type } => {
                write!(f, "fileOpened(id {}, {:?})", id, media_type)
            }
        }
    }
}
