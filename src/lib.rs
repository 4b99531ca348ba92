// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! ZXHost: host controller for a ZX Spectrum emulator
//!
//! The instruction-executing core runs as a separate compute worker reached
//! only through messages. This library paces the 50 Hz frame loop against
//! wall-clock time, moves video/audio buffers to and from the worker, and
//! classifies snapshot, tape and archive files before loading them.

pub mod assets;
pub mod audio;
pub mod config;
pub mod core;
pub mod display;
pub mod emulator;
pub mod error;
pub mod events;
pub mod formats;
pub mod machine;
pub mod protocol;
pub mod scheduler;

// Re-export commonly used types
pub use assets::{AssetSource, DirectoryAssets, MemoryAssets};
pub use audio::{AudioBufferQueue, AudioSink};
pub use config::EmulatorConfig;
pub use crate::core::{channel, LoadHandle, LoadOutcome, WorkerEndpoint, WorkerLink};
pub use display::{FrameBufferPool, VideoSink};
pub use emulator::Emulator;
pub use error::LoadError;
pub use events::{Event, EventKind};
pub use formats::{classify, Dispatch, SnapshotDescriptor};
pub use machine::{MachineType, TapeAutoLoadMode};
pub use protocol::{HostMessage, MediaType, WorkerMessage};
pub use scheduler::{FrameScheduler, RunState, SchedulerStats};
