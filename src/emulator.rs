// Copyright (C) 2025 Dayton Fishell
// ZXHost Spectrum Emulator Host
// This file is part of ZXHost.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host-side emulator facade
//!
//! Owns the worker link, the frame scheduler and the correlation table, and
//! exposes the lifecycle and load operations used by outer control code.
//! Everything mutable sits behind a mutex, so the render loop and inbound
//! message handling may run on different threads. Locks are taken in the
//! order scheduler, video, audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::assets::{AssetSource, DirectoryAssets};
use crate::audio::{AudioBufferQueue, AudioSink};
use crate::config::EmulatorConfig;
use crate::core::pending::LoadOutcome;
use crate::core::{Disconnected, LoadHandle, PendingLoads, WorkerLink};
use crate::display::{FrameBufferPool, VideoSink};
use crate::error::LoadError;
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::formats::{self, tape, Dispatch, SnapshotDescriptor};
use crate::machine::{MachineType, TapeAutoLoadMode, ROM_PAGES};
use crate::protocol::{FrameBuffers, HostMessage, LoadId, LoadKind, MediaType, WorkerMessage};
use crate::scheduler::{Clock, FramePipeline, FrameScheduler, SchedulerStats, SystemClock};

/// How long [`Emulator::run_message_loop`] waits before re-checking for exit.
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    machine: MachineType,
    auto_load_tapes: bool,
    tape_auto_load_mode: TapeAutoLoadMode,
}

/// Frame plumbing handed to the scheduler for one tick or completion.
struct FrameIo<'a> {
    link: &'a WorkerLink,
    video: &'a mut dyn VideoSink,
    audio: &'a mut dyn AudioSink,
}

impl FramePipeline for FrameIo<'_> {
    fn frame_ready(&self) -> bool {
        self.video.is_frame_ready()
    }

    fn present_frame(&mut self) {
        self.video.present();
    }

    fn request_frame(&mut self) -> bool {
        let Some(video) = self.video.next_frame_buffer() else {
            warn!("no free video buffer; frame request skipped");
            return false;
        };
        let audio = if self.audio.is_active() {
            self.audio.next_frame_buffers()
        } else {
            None
        };
        match self.link.post(HostMessage::RunFrame(FrameBuffers { video, audio })) {
            Ok(()) => true,
            Err(e) => {
                error!("frame request failed: {}", e);
                false
            }
        }
    }
}

pub struct Emulator {
    link: WorkerLink,
    pending: PendingLoads,
    scheduler: Mutex<FrameScheduler>,
    video: Mutex<Box<dyn VideoSink>>,
    audio: Mutex<Box<dyn AudioSink>>,
    settings: Mutex<Settings>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    assets: Arc<dyn AssetSource>,
    config: EmulatorConfig,
    worker_ready: AtomicBool,
}

impl Emulator {
    /// Create the host and ask the worker to bootstrap its core.
    pub fn new(config: EmulatorConfig, link: WorkerLink) -> Self {
        let audio: Box<dyn AudioSink> = if config.audio {
            Box::new(AudioBufferQueue::new(config.sample_rate))
        } else {
            Box::new(AudioBufferQueue::disabled())
        };
        let emulator = Self {
            pending: PendingLoads::new(),
            scheduler: Mutex::new(FrameScheduler::new()),
            video: Mutex::new(Box::new(FrameBufferPool::new())),
            audio: Mutex::new(audio),
            settings: Mutex::new(Settings {
                machine: config.machine,
                auto_load_tapes: config.auto_load_tapes,
                tape_auto_load_mode: config.tape_auto_load_mode,
            }),
            events: EventBus::new(),
            clock: Arc::new(SystemClock),
            assets: Arc::new(DirectoryAssets::new(config.asset_base.clone())),
            config,
            worker_ready: AtomicBool::new(false),
            link,
        };
        let base_url = emulator.config.asset_base.display().to_string();
        emulator.post(HostMessage::LoadCore { base_url });
        emulator
    }

    /// Use `sink` instead of the built-in frame buffer pool.
    pub fn with_video_sink(mut self, sink: impl VideoSink + 'static) -> Self {
        self.video = Mutex::new(Box::new(sink));
        self
    }

    /// Use `sink` instead of the built-in audio queue.
    pub fn with_audio_sink(mut self, sink: impl AudioSink + 'static) -> Self {
        self.audio = Mutex::new(Box::new(sink));
        self
    }

    /// Use `clock` for frame timing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `assets` for ROMs, tape loaders and URLs.
    pub fn with_assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = assets;
        self
    }

    /// Replace the frame period, for tools that run faster than real time.
    pub fn with_frame_period(self, period: Duration) -> Self {
        *lock(&self.scheduler) = FrameScheduler::with_period(period);
        self
    }

    /// The configuration the host was created with.
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    fn post(&self, msg: HostMessage) -> bool {
        let name = msg.name();
        match self.link.post(msg) {
            Ok(()) => true,
            Err(e) => {
                error!("{} not delivered: {}", name, e);
                false
            }
        }
    }

    /// Whether the worker has reported that its core is loaded.
    pub fn is_worker_ready(&self) -> bool {
        self.worker_ready.load(Ordering::Acquire)
    }

    /// Resume frame scheduling. Publishes [`Event::Start`] when the state changes.
    pub fn start(&self) {
        let started = lock(&self.scheduler).start(self.clock.now());
        if started {
            self.events.publish(&Event::Start);
        }
    }

    /// Stop requesting frames. A frame already in flight still completes.
    pub fn pause(&self) {
        let paused = lock(&self.scheduler).pause();
        if paused {
            self.events.publish(&Event::Pause);
        }
    }

    /// Whether frames are being scheduled.
    pub fn is_running(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    /// Ask the worker to reset the machine.
    pub fn reset(&self) {
        info!("reset");
        self.post(HostMessage::Reset);
    }

    /// Select a machine by numeric code; unknown codes select the 48K.
    pub fn set_machine(&self, code: u32) {
        self.apply_machine(MachineType::from_code(code));
    }

    fn apply_machine(&self, machine: MachineType) {
        lock(&self.settings).machine = machine;
        info!("machine set to {}", machine);
        self.post(HostMessage::SetMachineType { machine });
        self.events.publish(&Event::MachineChanged(machine));
    }

    /// The machine currently selected.
    pub fn machine(&self) -> MachineType {
        lock(&self.settings).machine
    }

    /// Enable or disable typing the loading command when a tape is opened.
    pub fn set_auto_load_tapes(&self, enabled: bool) {
        lock(&self.settings).auto_load_tapes = enabled;
        self.events.publish(&Event::AutoLoadTapesChanged(enabled));
    }

    pub fn auto_load_tapes(&self) -> bool {
        lock(&self.settings).auto_load_tapes
    }

    /// Choose how the tape loader is started on 128K machines.
    pub fn set_tape_auto_load_mode(&self, mode: TapeAutoLoadMode) {
        lock(&self.settings).tape_auto_load_mode = mode;
        self.events.publish(&Event::TapeAutoLoadModeChanged(mode));
    }

    pub fn tape_auto_load_mode(&self) -> TapeAutoLoadMode {
        lock(&self.settings).tape_auto_load_mode
    }

    /// Load a parsed snapshot. Its model becomes the current machine.
    pub fn load_snapshot(&self, snapshot: SnapshotDescriptor) -> LoadHandle {
        let model = snapshot.model;
        let changed = {
            let mut settings = lock(&self.settings);
            let changed = settings.machine != model;
            settings.machine = model;
            changed
        };
        if changed {
            info!("snapshot switched machine to {}", model);
            self.events.publish(&Event::MachineChanged(model));
        }

        let (id, handle) = self.pending.register(LoadKind::Snapshot);
        let msg = HostMessage::LoadSnapshot {
            id,
            snapshot: Box::new(snapshot),
        };
        if !self.post(msg) {
            self.pending.fail(id, LoadError::WorkerUnavailable);
        }
        handle
    }

    /// Open a `.tap` image after checking its block structure.
    pub fn open_tap_file(&self, data: Vec<u8>) -> LoadHandle {
        if let Err(e) = tape::validate_tap(&data) {
            return LoadHandle::failed(LoadError::InvalidTap(e));
        }
        self.send_tape(LoadKind::TapePayload, data)
    }

    /// Open a `.tzx` image after checking its header and blocks.
    pub fn open_tzx_file(&self, data: Vec<u8>) -> LoadHandle {
        if let Err(e) = tape::validate_tzx(&data) {
            return LoadHandle::failed(LoadError::InvalidTzx(e));
        }
        self.send_tape(LoadKind::RawTape, data)
    }

    fn send_tape(&self, kind: LoadKind, data: Vec<u8>) -> LoadHandle {
        let (id, handle) = self.pending.register(kind);
        let msg = match kind {
            LoadKind::RawTape => HostMessage::OpenTzxFile { id, data },
            _ => HostMessage::OpenTapFile { id, data },
        };
        if !self.post(msg) {
            self.pending.fail(id, LoadError::WorkerUnavailable);
        }
        handle
    }

    /// Classify a named file and load it.
    pub fn open_file(&self, name: &str, data: Vec<u8>) -> LoadHandle {
        match formats::classify(name, data) {
            Ok(dispatch) => self.dispatch(dispatch),
            Err(e) => {
                warn!("cannot open {}: {}", name, e);
                LoadHandle::failed(e)
            }
        }
    }

    fn dispatch(&self, dispatch: Dispatch) -> LoadHandle {
        match dispatch {
            Dispatch::Snapshot(snapshot) => self.load_snapshot(snapshot),
            Dispatch::Tap(data) => self.send_tape(LoadKind::TapePayload, data),
            Dispatch::Tzx(data) => self.send_tape(LoadKind::RawTape, data),
        }
    }

    /// Fetch `url` from the asset source and open it.
    pub fn open_url(&self, url: &str) -> LoadHandle {
        let data = match self.assets.fetch(url) {
            Ok(data) => data,
            Err(e) => {
                warn!("cannot fetch {}: {:#}", url, e);
                return LoadHandle::failed(LoadError::Fetch {
                    location: url.to_string(),
                    reason: format!("{:#}", e),
                });
            }
        };
        self.open_file(file_name_of(url), data)
    }

    /// Open several URLs in order; one handle per URL.
    pub fn open_url_list<S: AsRef<str>>(&self, urls: &[S]) -> Vec<LoadHandle> {
        urls.iter().map(|url| self.open_url(url.as_ref())).collect()
    }

    /// Stop for good. Pending loads are abandoned and the worker is told to
    /// terminate.
    pub fn exit(&self) {
        lock(&self.scheduler).exit();
        let abandoned = self.pending.abandon_all();
        info!("exit ({} pending loads abandoned)", abandoned);
        self.post(HostMessage::Terminate);
        self.events.publish(&Event::Exit);
    }

    /// Whether [`exit`](Self::exit) has been called.
    pub fn has_exited(&self) -> bool {
        lock(&self.scheduler).has_exited()
    }

    /// One presentation callback: show a finished frame and request the next
    /// one when it is due.
    pub fn render_tick(&self) {
        let now = self.clock.now();
        let mut scheduler = lock(&self.scheduler);
        let mut video = lock(&self.video);
        let mut audio = lock(&self.audio);
        let mut io = FrameIo {
            link: &self.link,
            video: video.as_mut(),
            audio: audio.as_mut(),
        };
        scheduler.tick(now, &mut io);
    }

    /// React to one message from the worker.
    pub fn handle_worker_message(&self, msg: WorkerMessage) {
        match &msg {
            WorkerMessage::FrameCompleted(_) => trace!("<- {}", msg),
            _ => debug!("<- {}", msg),
        }
        match msg {
            WorkerMessage::Ready => self.on_ready(),
            WorkerMessage::FrameCompleted(buffers) => self.on_frame_completed(buffers),
            WorkerMessage::FileOpened { id, media_type } => self.on_file_opened(id, media_type),
        }
    }

    fn on_ready(&self) {
        info!("worker ready");
        self.worker_ready.store(true, Ordering::Release);
        self.events.publish(&Event::Ready);

        for (location, page) in ROM_PAGES {
            match self.assets.fetch(location) {
                Ok(data) => {
                    self.post(HostMessage::LoadMemory { data, page: *page });
                }
                Err(e) => warn!("skipping ROM {}: {:#}", location, e),
            }
        }
        self.apply_machine(self.config.machine);

        if !self.config.open_urls.is_empty() {
            for handle in self.open_url_list(self.config.open_urls.as_slice()) {
                if let Ok(Err(e)) = handle.try_wait() {
                    warn!("startup file not loaded: {}", e);
                }
            }
        }
        if self.config.auto_start {
            self.start();
        }
    }

    fn on_frame_completed(&self, buffers: FrameBuffers) {
        let now = self.clock.now();
        let mut scheduler = lock(&self.scheduler);
        if !scheduler.frame_in_flight() {
            warn!("dropping frame completion: no frame in flight");
            return;
        }
        let mut video = lock(&self.video);
        let mut audio = lock(&self.audio);
        video.frame_completed(buffers.video);
        if let Some(samples) = buffers.audio {
            audio.frame_completed(samples);
        }
        let mut io = FrameIo {
            link: &self.link,
            video: video.as_mut(),
            audio: audio.as_mut(),
        };
        scheduler.frame_completed(now, &mut io);
    }

    fn on_file_opened(&self, id: LoadId, media_type: MediaType) {
        let Some((kind, resolver)) = self.pending.take(id) else {
            return;
        };
        debug!("{:?} load {} opened as {:?}", kind, id, media_type);

        let settings = *lock(&self.settings);
        if media_type == MediaType::Tape && settings.auto_load_tapes {
            self.load_tape_bootstrap(settings.machine, settings.tape_auto_load_mode);
        }
        resolver.resolve(Ok(LoadOutcome { media_type }));
        self.events.publish(&Event::FileOpened { id, media_type });
    }

    /// Send the snapshot that types the loading command for a fresh tape.
    fn load_tape_bootstrap(&self, machine: MachineType, mode: TapeAutoLoadMode) {
        let location = machine.tape_loader(mode);
        let snapshot = self
            .assets
            .fetch(location)
            .map_err(|e| format!("{:#}", e))
            .and_then(|data| formats::szx::parse(&data).map_err(|e| e.to_string()));
        match snapshot {
            Ok(snapshot) => {
                info!("auto-loading tape with {}", location);
                // nobody waits on the bootstrap load itself
                drop(self.load_snapshot(snapshot));
            }
            Err(reason) => warn!("tape auto-load skipped, {}: {}", location, reason),
        }
    }

    /// Handle everything the worker has sent so far. Returns the number of
    /// messages handled.
    pub fn pump(&self) -> Result<usize, Disconnected> {
        let mut handled = 0;
        while let Some(msg) = self.link.try_recv()? {
            self.handle_worker_message(msg);
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle worker messages until [`exit`](Self::exit) is called or the
    /// worker hangs up.
    pub fn run_message_loop(&self) -> Result<(), Disconnected> {
        while !self.has_exited() {
            match self.link.recv_timeout(MESSAGE_POLL_INTERVAL) {
                Ok(Some(msg)) => self.handle_worker_message(msg),
                Ok(None) => {}
                Err(e) => {
                    error!("worker link lost: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Call `callback` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Counters from the frame scheduler.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        lock(&self.scheduler).stats()
    }

    /// Loads sent to the worker and not yet answered.
    pub fn pending_loads(&self) -> usize {
        self.pending.len()
    }

    /// Run `f` against the video sink, e.g. to read the shown frame.
    pub fn with_video<R>(&self, f: impl FnOnce(&mut dyn VideoSink) -> R) -> R {
        let mut video = lock(&self.video);
        f(video.as_mut())
    }

    /// Run `f` against the audio sink.
    pub fn with_audio<R>(&self, f: impl FnOnce(&mut dyn AudioSink) -> R) -> R {
        let mut audio = lock(&self.audio);
        f(audio.as_mut())
    }
}

/// Last path component of a URL, without query or fragment.
fn file_name_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::core::{channel, WorkerEndpoint};
    use crate::display::FRAME_BUFFER_SIZE;
    use crate::formats::archive::tests::build_zip;
    use crate::formats::{sna, szx};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn host_with(
        config: EmulatorConfig,
        assets: MemoryAssets,
    ) -> (Emulator, WorkerEndpoint, Arc<ManualClock>) {
        let (link, worker) = channel();
        let clock = ManualClock::new();
        let emu = Emulator::new(config, link)
            .with_clock(clock.clone())
            .with_assets(Arc::new(assets));
        assert!(matches!(worker.recv(), Some(HostMessage::LoadCore { .. })));
        (emu, worker, clock)
    }

    fn host() -> (Emulator, WorkerEndpoint, Arc<ManualClock>) {
        host_with(EmulatorConfig::default(), MemoryAssets::new())
    }

    fn names(messages: &[HostMessage]) -> Vec<&'static str> {
        messages.iter().map(HostMessage::name).collect()
    }

    #[test]
    fn ready_installs_roms_then_machine_then_starts() {
        let assets = MemoryAssets::new()
            .with("roms/48.rom", vec![0xF3; 16])
            .with("roms/128-0.rom", vec![0x01; 16]);
        let config = EmulatorConfig {
            machine: MachineType::Spectrum128K,
            auto_start: true,
            ..EmulatorConfig::default()
        };
        let (emu, worker, _) = host_with(config, assets);
        emu.handle_worker_message(WorkerMessage::Ready);

        let sent = worker.drain();
        assert_eq!(names(&sent), vec!["loadMemory", "loadMemory", "setMachineType"]);
        assert!(matches!(sent[0], HostMessage::LoadMemory { page: 8, .. }));
        assert!(matches!(sent[1], HostMessage::LoadMemory { page: 10, .. }));
        assert!(matches!(
            sent[2],
            HostMessage::SetMachineType {
                machine: MachineType::Spectrum128K
            }
        ));
        assert!(emu.is_worker_ready());
        assert!(emu.is_running());
    }

    #[test]
    fn ready_opens_startup_urls() {
        let assets = MemoryAssets::new().with("games/demo.tap", tape::tests::sample_tap());
        let config = EmulatorConfig {
            open_urls: vec!["games/demo.tap".into(), "games/missing.tzx".into()],
            ..EmulatorConfig::default()
        };
        let (emu, worker, _) = host_with(config, assets);
        emu.handle_worker_message(WorkerMessage::Ready);
        let sent = worker.drain();
        assert_eq!(names(&sent), vec!["setMachineType", "openTAPFile"]);
        assert_eq!(emu.pending_loads(), 1);
        assert!(!emu.is_running());
    }

    #[test]
    fn frames_carry_buffers_out_and_back() {
        let (emu, worker, clock) = host();
        emu.start();
        emu.render_tick();

        let buffers = match worker.drain().pop() {
            Some(HostMessage::RunFrame(buffers)) => buffers,
            other => panic!("expected runFrame, got {:?}", other),
        };
        assert_eq!(buffers.video.len(), FRAME_BUFFER_SIZE);
        assert_eq!(buffers.audio.as_ref().map(|a| a.left.len()), Some(882));

        clock.advance(Duration::from_millis(5));
        emu.render_tick();
        assert!(worker.drain().is_empty());

        let mut video = buffers.video;
        video[0] = 0xAA;
        emu.handle_worker_message(WorkerMessage::FrameCompleted(FrameBuffers {
            video,
            audio: buffers.audio,
        }));
        clock.advance(Duration::from_millis(20));
        emu.render_tick();

        assert_eq!(names(&worker.drain()), vec!["runFrame"]);
        assert!(!emu.with_video(|video| video.is_frame_ready()));
        let stats = emu.scheduler_stats();
        assert_eq!(stats.frames_requested, 2);
        assert_eq!(stats.frames_completed, 1);
        assert_eq!(stats.frames_presented, 1);
    }

    #[test]
    fn late_completion_requests_immediately() {
        let (emu, worker, clock) = host();
        emu.start();
        emu.render_tick();
        let Some(HostMessage::RunFrame(buffers)) = worker.recv() else {
            panic!("expected runFrame");
        };
        clock.advance(Duration::from_millis(45));
        emu.handle_worker_message(WorkerMessage::FrameCompleted(buffers));
        assert_eq!(names(&worker.drain()), vec!["runFrame"]);
        assert_eq!(emu.scheduler_stats().fast_path_frames, 1);
    }

    struct CountingSink {
        presents: Arc<AtomicUsize>,
        ready: bool,
    }

    impl VideoSink for CountingSink {
        fn next_frame_buffer(&mut self) -> Option<Vec<u8>> {
            Some(vec![0; 4])
        }

        fn frame_completed(&mut self, _buffer: Vec<u8>) {
            self.ready = true;
        }

        fn is_frame_ready(&self) -> bool {
            self.ready
        }

        fn present(&mut self) {
            self.ready = false;
            self.presents.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn custom_video_sink_and_period_drive_frames() {
        let presents = Arc::new(AtomicUsize::new(0));
        let (emu, worker, clock) = host();
        let emu = emu
            .with_video_sink(CountingSink {
                presents: presents.clone(),
                ready: false,
            })
            .with_frame_period(Duration::from_millis(5));
        emu.start();
        emu.render_tick();
        let Some(HostMessage::RunFrame(buffers)) = worker.recv() else {
            panic!("expected runFrame");
        };
        assert_eq!(buffers.video.len(), 4);

        emu.handle_worker_message(WorkerMessage::FrameCompleted(buffers));
        clock.advance(Duration::from_millis(5));
        emu.render_tick();

        assert_eq!(presents.load(Ordering::SeqCst), 1);
        assert_eq!(names(&worker.drain()), vec!["runFrame"]);
        assert_eq!(emu.scheduler_stats().frames_requested, 2);
    }

    #[test]
    fn stray_frame_completion_is_dropped() {
        let (emu, worker, _) = host();
        emu.handle_worker_message(WorkerMessage::FrameCompleted(FrameBuffers::default()));
        assert_eq!(emu.scheduler_stats(), SchedulerStats::default());
        assert!(worker.drain().is_empty());
    }

    #[test]
    fn pause_lets_the_in_flight_frame_finish() {
        let (emu, worker, clock) = host();
        emu.start();
        emu.render_tick();
        let Some(HostMessage::RunFrame(buffers)) = worker.recv() else {
            panic!("expected runFrame");
        };
        emu.pause();
        clock.advance(Duration::from_millis(100));
        emu.handle_worker_message(WorkerMessage::FrameCompleted(buffers));
        emu.render_tick();
        assert!(worker.drain().is_empty());
        assert_eq!(emu.scheduler_stats().frames_completed, 1);
        assert_eq!(emu.scheduler_stats().frames_presented, 1);
    }

    #[test]
    fn unknown_machine_code_selects_48k() {
        let (emu, worker, _) = host();
        emu.set_machine(128);
        emu.set_machine(200);
        assert_eq!(emu.machine(), MachineType::Spectrum48K);
        let machines: Vec<_> = worker
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                HostMessage::SetMachineType { machine } => Some(machine),
                _ => None,
            })
            .collect();
        assert_eq!(machines, vec![MachineType::Spectrum128K, MachineType::Spectrum48K]);
    }

    #[test]
    fn classification_errors_never_reach_the_worker() {
        let (emu, worker, _) = host();
        let cases = [
            emu.open_file("notes.txt", vec![1, 2, 3]),
            emu.open_file("game.tap", vec![9, 0, 1]),
            emu.open_tzx_file(b"garbage".to_vec()),
            emu.open_file("two.zip", build_zip(&[("a.tap", &b""[..]), ("b.tap", &b""[..])])),
        ];
        for handle in cases {
            assert_eq!(handle.id(), None);
            assert!(handle.wait().unwrap_err().is_classification());
        }
        assert!(worker.drain().is_empty());
        assert_eq!(emu.pending_loads(), 0);
    }

    #[test]
    fn tape_load_resolves_on_matching_reply() {
        let (emu, worker, _) = host();
        let first = emu.open_tap_file(tape::tests::sample_tap());
        let second = emu.open_file("GAME.TZX", tape::tests::sample_tzx());
        let sent = worker.drain();
        assert!(matches!(sent[0], HostMessage::OpenTapFile { .. }));
        assert!(matches!(sent[1], HostMessage::OpenTzxFile { .. }));

        let second_id = second.id().unwrap();
        assert_ne!(first.id(), second.id());
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id: second_id,
            media_type: MediaType::Tape,
        });
        let first = first.try_wait().unwrap_err();
        assert_eq!(
            second.wait().unwrap(),
            LoadOutcome {
                media_type: MediaType::Tape
            }
        );
        assert_eq!(emu.pending_loads(), 1);
        drop(first);
    }

    #[test]
    fn unknown_or_repeated_ids_are_ignored() {
        let (emu, _worker, _) = host();
        let handle = emu.open_tap_file(tape::tests::sample_tap());
        let id = handle.id().unwrap();
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id: id + 100,
            media_type: MediaType::Snapshot,
        });
        assert_eq!(emu.pending_loads(), 1);

        emu.handle_worker_message(WorkerMessage::FileOpened {
            id,
            media_type: MediaType::Tape,
        });
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id,
            media_type: MediaType::Tape,
        });
        assert!(handle.wait().is_ok());
        assert_eq!(emu.pending_loads(), 0);
    }

    #[test]
    fn auto_load_sends_bootstrap_before_resolving() {
        let assets = MemoryAssets::new()
            .with("tapeloaders/tape_128_usr0.szx", szx::tests::sample(2, 0x1234));
        let (emu, worker, _) = host_with(EmulatorConfig::default(), assets);
        emu.set_machine(128);
        emu.set_auto_load_tapes(true);
        emu.set_tape_auto_load_mode(TapeAutoLoadMode::Usr0);

        let handle = emu.open_tap_file(tape::tests::sample_tap());
        let id = handle.id().unwrap();
        assert_eq!(names(&worker.drain()), vec!["setMachineType", "openTAPFile"]);

        let waiter = std::thread::spawn(move || {
            let outcome = handle.wait();
            (outcome, worker.drain())
        });
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id,
            media_type: MediaType::Tape,
        });

        let (outcome, sent_before_resolve) = waiter.join().unwrap();
        assert_eq!(outcome.unwrap().media_type, MediaType::Tape);
        match sent_before_resolve.as_slice() {
            [HostMessage::LoadSnapshot { id: boot_id, snapshot }] => {
                assert_ne!(*boot_id, id);
                assert_eq!(snapshot.model, MachineType::Spectrum128K);
                assert_eq!(snapshot.registers.pc, 0x1234);
            }
            other => panic!("expected one loadSnapshot, got {:?}", names(other)),
        }
        assert_eq!(emu.pending_loads(), 1);
    }

    #[test]
    fn snapshot_replies_do_not_trigger_auto_load() {
        let (emu, worker, _) = host();
        emu.set_auto_load_tapes(true);
        let handle = emu.open_file("game.sna", sna::tests::sample_48k());
        let id = handle.id().unwrap();
        worker.drain();
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id,
            media_type: MediaType::Snapshot,
        });
        assert!(worker.drain().is_empty());
        assert_eq!(handle.wait().unwrap().media_type, MediaType::Snapshot);
    }

    #[test]
    fn missing_tape_loader_still_resolves_the_tape() {
        let (emu, worker, _) = host();
        emu.set_auto_load_tapes(true);
        let handle = emu.open_tap_file(tape::tests::sample_tap());
        let id = handle.id().unwrap();
        worker.drain();
        emu.handle_worker_message(WorkerMessage::FileOpened {
            id,
            media_type: MediaType::Tape,
        });
        assert!(worker.drain().is_empty());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn snapshot_model_becomes_current_machine() {
        let (emu, worker, _) = host();
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        emu.subscribe(EventKind::MachineChanged, move |event| {
            assert_eq!(*event, Event::MachineChanged(MachineType::Spectrum128K));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let handle = emu.open_file("demo.szx", szx::tests::sample(2, 0x8000));
        assert!(handle.id().is_some());
        assert_eq!(emu.machine(), MachineType::Spectrum128K);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(names(&worker.drain()), vec!["loadSnapshot"]);
    }

    #[test]
    fn open_url_reads_from_assets() {
        let zip = build_zip(&[("inner/game.sna", sna::tests::sample_48k().as_slice())]);
        let assets = MemoryAssets::new().with("https://zx.example/games/pack.zip?x=1", zip);
        let (emu, worker, _) = host_with(EmulatorConfig::default(), assets);

        let handles = emu.open_url_list(&["https://zx.example/games/pack.zip?x=1", "missing.tap"]);
        assert_eq!(handles.len(), 2);
        assert!(handles[0].id().is_some());
        assert_eq!(names(&worker.drain()), vec!["loadSnapshot"]);

        let mut handles = handles.into_iter();
        let _ = handles.next();
        assert!(matches!(
            handles.next().map(LoadHandle::wait),
            Some(Err(LoadError::Fetch { location, .. })) if location == "missing.tap"
        ));
    }

    #[test]
    fn load_ids_are_never_reused() {
        let (emu, _worker, _) = host();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let handle = emu.open_tap_file(tape::tests::sample_tap());
            let id = handle.id().unwrap();
            assert!(seen.insert(id));
            emu.handle_worker_message(WorkerMessage::FileOpened {
                id,
                media_type: MediaType::Tape,
            });
        }
    }

    #[test]
    fn exit_abandons_pending_loads_and_terminates_worker() {
        let (emu, worker, _) = host();
        let handle = emu.open_tap_file(tape::tests::sample_tap());
        let id = handle.id().unwrap();
        emu.start();
        emu.exit();

        assert!(matches!(handle.wait(), Err(LoadError::Abandoned(x)) if x == id));
        assert_eq!(worker.drain().last(), Some(&HostMessage::Terminate));
        emu.start();
        assert!(!emu.is_running());
        assert!(emu.has_exited());
    }

    #[test]
    fn exit_with_the_worker_gone_still_stops() {
        let (emu, worker, _) = host();
        let handle = emu.open_tap_file(tape::tests::sample_tap());
        emu.start();
        drop(worker);
        emu.exit();
        assert!(matches!(handle.wait(), Err(LoadError::Abandoned(_))));
        assert!(emu.has_exited());
    }

    #[test]
    fn hung_up_worker_fails_loads() {
        let (emu, worker, _) = host();
        drop(worker);
        let handle = emu.open_tap_file(tape::tests::sample_tap());
        assert!(matches!(handle.wait(), Err(LoadError::WorkerUnavailable)));
        assert_eq!(emu.pending_loads(), 0);
        assert_eq!(emu.pump(), Err(Disconnected));
    }

    #[test]
    fn pump_handles_queued_messages() {
        let (link, worker) = channel();
        let emu = Emulator::new(EmulatorConfig::default(), link)
            .with_assets(Arc::new(MemoryAssets::new()));
        worker.send(WorkerMessage::Ready).unwrap();
        assert_eq!(emu.pump(), Ok(1));
        assert!(emu.is_worker_ready());
        assert_eq!(emu.pump(), Ok(0));
    }

    #[test]
    fn observers_see_lifecycle_events() {
        let (emu, _worker, _) = host();
        let starts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&starts);
        let id = emu.subscribe(EventKind::Start, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        emu.start();
        emu.start();
        emu.pause();
        emu.start();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(emu.unsubscribe(id));
    }

    #[test]
    fn url_file_names_drop_query_and_path() {
        assert_eq!(file_name_of("https://host/a/b/game.tzx?dl=1#top"), "game.tzx");
        assert_eq!(file_name_of("games/demo.z80"), "demo.z80");
        assert_eq!(file_name_of("plain.tap"), "plain.tap");
    }
}
