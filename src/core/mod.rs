// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod link;
pub mod pending;

// Re-export commonly used core types here
pub use link::{channel, Disconnected, WorkerEndpoint, WorkerLink};
pub use pending::{LoadHandle, LoadOutcome, LoadResult, PendingLoads};
