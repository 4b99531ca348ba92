// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

// Headless driver: runs the host against a loopback worker that answers every
// request and hands frame buffers straight back.
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use zxhost_core::{
    channel, Emulator, EmulatorConfig, HostMessage, LoadHandle, MachineType, MediaType,
    TapeAutoLoadMode, WorkerEndpoint, WorkerMessage,
};

#[derive(Parser, Debug)]
#[command(name = "zxhost", version, about = "ZX Spectrum emulator host controller")]
struct Cli {
    /// JSON or YAML emulator config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Machine code: 48, 128 or 5 (Pentagon).
    #[arg(long)]
    machine: Option<u32>,

    /// Directory holding roms/ and tapeloaders/.
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Type the load command automatically when a tape is opened.
    #[arg(long)]
    auto_load_tapes: bool,

    /// Tape auto-load mode: default or usr0.
    #[arg(long)]
    tape_mode: Option<TapeAutoLoadMode>,

    /// Stop after this many completed frames.
    #[arg(long, default_value_t = 50)]
    frames: u64,

    /// Frame period in milliseconds; the real machine runs at 20.
    #[arg(long)]
    frame_ms: Option<u64>,

    /// Snapshot, tape or zip files to open once the worker is ready.
    files: Vec<PathBuf>,
}

/// Stand-in for the compute worker.
fn loopback_worker(endpoint: WorkerEndpoint) {
    while let Some(msg) = endpoint.recv() {
        let reply = match msg {
            HostMessage::LoadCore { .. } => Some(WorkerMessage::Ready),
            HostMessage::RunFrame(buffers) => Some(WorkerMessage::FrameCompleted(buffers)),
            HostMessage::LoadSnapshot { id, .. } => Some(WorkerMessage::FileOpened {
                id,
                media_type: MediaType::Snapshot,
            }),
            HostMessage::OpenTapFile { id, .. } | HostMessage::OpenTzxFile { id, .. } => {
                Some(WorkerMessage::FileOpened {
                    id,
                    media_type: MediaType::Tape,
                })
            }
            HostMessage::Terminate => break,
            _ => None,
        };
        if let Some(reply) = reply {
            if endpoint.send(reply).is_err() {
                break;
            }
        }
    }
}

#[cfg(feature = "serde-config")]
fn read_config_file(path: &Path) -> Result<EmulatorConfig> {
    EmulatorConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

#[cfg(not(feature = "serde-config"))]
fn read_config_file(path: &Path) -> Result<EmulatorConfig> {
    anyhow::bail!("cannot read {}: built without serde-config", path.display())
}

fn load_config(cli: &Cli) -> Result<EmulatorConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config_file(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(code) = cli.machine {
        config.machine = MachineType::from_code(code);
    }
    if let Some(assets) = &cli.assets {
        config.asset_base = assets.clone();
    }
    if cli.auto_load_tapes {
        config.auto_load_tapes = true;
    }
    if let Some(mode) = cli.tape_mode {
        config.tape_auto_load_mode = mode;
    }
    config.auto_start = true;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    println!("ZXHost v{}", env!("CARGO_PKG_VERSION"));
    println!("  Machine: {}", config.machine);
    println!("  Assets:  {}", config.asset_base.display());
    println!();

    let (link, endpoint) = channel();
    let worker = thread::spawn(move || loopback_worker(endpoint));
    let mut emulator = Emulator::new(config, link);
    if let Some(ms) = cli.frame_ms {
        emulator = emulator.with_frame_period(Duration::from_millis(ms));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !emulator.is_worker_ready() {
        emulator.pump()?;
        anyhow::ensure!(Instant::now() < deadline, "worker never became ready");
        thread::sleep(Duration::from_millis(1));
    }

    let mut loads: Vec<(String, LoadHandle)> = Vec::new();
    for path in &cli.files {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path.display().to_string();
        info!("opening {}", name);
        let handle = emulator.open_file(&name, data);
        loads.push((name, handle));
    }

    while emulator.scheduler_stats().frames_completed < cli.frames {
        emulator.pump()?;
        emulator.render_tick();
        thread::sleep(Duration::from_millis(1));
    }
    emulator.pump()?;

    for (name, handle) in loads {
        match handle.try_wait() {
            Ok(Ok(outcome)) => println!("  {}: loaded as {:?}", name, outcome.media_type),
            Ok(Err(e)) => println!("  {}: {}", name, e),
            Err(_) => println!("  {}: still pending", name),
        }
    }

    emulator.exit();
    let _ = worker.join();

    let stats = emulator.scheduler_stats();
    println!();
    println!("Frames:");
    println!("  Requested:  {}", stats.frames_requested);
    println!("  Completed:  {}", stats.frames_completed);
    println!("  Fast path:  {}", stats.fast_path_frames);
    println!("  Presented:  {}", stats.frames_presented);
    println!("  Machine:    {}", emulator.machine());
    Ok(())
}
