//! Audio boundary and a queue of completed frames for a playback callback

use std::collections::VecDeque;

use log::{debug, trace};

use crate::protocol::AudioBuffers;

/// Frames per second of emulated time.
pub const FRAME_RATE: u32 = 50;

/// Completed frames kept before the oldest is discarded.
const QUEUE_DEPTH: usize = 4;

/// Supplies audio buffers for frame requests and takes them back filled.
pub trait AudioSink: Send {
    fn is_active(&self) -> bool;
    /// Buffers to hand to the worker, or `None` when audio is off.
    fn next_frame_buffers(&mut self) -> Option<AudioBuffers>;
    fn frame_completed(&mut self, buffers: AudioBuffers);
}

/// Bounded FIFO of filled frames plus a spare list for reuse.
#[derive(Debug)]
pub struct AudioBufferQueue {
    sample_rate: u32,
    samples_per_frame: usize,
    active: bool,
    spare: Vec<AudioBuffers>,
    queued: VecDeque<AudioBuffers>,
    overruns: u64,
}

impl AudioBufferQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples_per_frame: (sample_rate / FRAME_RATE) as usize,
            active: true,
            spare: Vec::new(),
            queued: VecDeque::with_capacity(QUEUE_DEPTH),
            overruns: 0,
        }
    }

    /// A queue that never hands out buffers.
    pub fn disabled() -> Self {
        let mut queue = Self::new(0);
        queue.active = false;
        queue
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn set_active(&mut self, active: bool) {
        if active != self.active {
            debug!("audio {}", if active { "enabled" } else { "disabled" });
        }
        self.active = active && self.samples_per_frame > 0;
        if !self.active {
            self.spare.extend(self.queued.drain(..));
        }
    }

    /// Oldest completed frame, for the playback device.
    pub fn pop_frame(&mut self) -> Option<AudioBuffers> {
        self.queued.pop_front()
    }

    /// Return a played frame for reuse.
    pub fn recycle(&mut self, buffers: AudioBuffers) {
        self.spare.push(buffers);
    }

    pub fn queued_frames(&self) -> usize {
        self.queued.len()
    }

    /// Frames discarded because playback fell behind.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl AudioSink for AudioBufferQueue {
    fn is_active(&self) -> bool {
        self.active
    }

    fn next_frame_buffers(&mut self) -> Option<AudioBuffers> {
        if !self.active {
            return None;
        }
        let samples = self.samples_per_frame;
        let buffers = self
            .spare
            .pop()
            .filter(|b| b.left.len() == samples && b.right.len() == samples)
            .unwrap_or_else(|| AudioBuffers::with_len(samples));
        Some(buffers)
    }

    fn frame_completed(&mut self, buffers: AudioBuffers) {
        if !self.active {
            self.spare.push(buffers);
            return;
        }
        self.queued.push_back(buffers);
        if self.queued.len() > QUEUE_DEPTH {
            if let Some(oldest) = self.queued.pop_front() {
                trace!("audio queue overrun");
                self.overruns += 1;
                self.spare.push(oldest);
            }
        }
    }
}
