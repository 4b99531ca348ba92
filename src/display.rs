//! Presentation boundary and the triple-buffered frame pool

use log::{trace, warn};

/// Bytes in one encoded video frame as produced by the worker.
pub const FRAME_BUFFER_SIZE: usize = 0x6600;

const POOL_SIZE: usize = 3;

/// Receives finished frames and shows them.
pub trait VideoSink: Send {
    /// Empty buffer for the worker to fill, or `None` if none is available.
    fn next_frame_buffer(&mut self) -> Option<Vec<u8>>;
    /// A filled buffer came back from the worker.
    fn frame_completed(&mut self, buffer: Vec<u8>);
    fn is_frame_ready(&self) -> bool;
    /// Show the most recently completed frame.
    fn present(&mut self);
}

/// Three buffers rotating between the worker, the queue for presentation and
/// the screen. A completed frame that is overtaken before it is presented is
/// dropped and its buffer recycled.
#[derive(Debug)]
pub struct FrameBufferPool {
    buffer_size: usize,
    free: Vec<Vec<u8>>,
    awaiting_show: Option<Vec<u8>>,
    shown: Option<Vec<u8>>,
    frames_presented: u64,
    frames_dropped: u64,
}

impl FrameBufferPool {
    pub fn new() -> Self {
        Self::with_buffer_size(FRAME_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            free: (0..POOL_SIZE).map(|_| vec![0; buffer_size]).collect(),
            awaiting_show: None,
            shown: None,
            frames_presented: 0,
            frames_dropped: 0,
        }
    }

    /// Frame currently on screen.
    pub fn shown_frame(&self) -> Option<&[u8]> {
        self.shown.as_deref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Buffers not currently lent to the worker.
    pub fn buffers_held(&self) -> usize {
        self.free.len() + usize::from(self.awaiting_show.is_some()) + usize::from(self.shown.is_some())
    }
}

impl VideoSink for FrameBufferPool {
    fn next_frame_buffer(&mut self) -> Option<Vec<u8>> {
        self.free.pop()
    }

    fn frame_completed(&mut self, mut buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            warn!(
                "video buffer came back with {} bytes, expected {}",
                buffer.len(),
                self.buffer_size
            );
            buffer.resize(self.buffer_size, 0);
        }
        if let Some(stale) = self.awaiting_show.replace(buffer) {
            trace!("frame dropped before presentation");
            self.frames_dropped += 1;
            self.free.push(stale);
        }
    }

    fn is_frame_ready(&self) -> bool {
        self.awaiting_show.is_some()
    }

    fn present(&mut self) {
        let Some(frame) = self.awaiting_show.take() else {
            return;
        };
        if let Some(previous) = self.shown.replace(frame) {
            self.free.push(previous);
        }
        self.frames_presented += 1;
    }
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new()
    }
}
