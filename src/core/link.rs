//! Channel endpoints joining the host to the compute worker.
//!
//! There is exactly one channel per direction, so messages are delivered in
//! the order they were posted.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, trace};
use thiserror::Error;

use crate::protocol::{HostMessage, WorkerMessage};

/// The other side of the link has gone away.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("worker link disconnected")]
pub struct Disconnected;

/// Create a connected host/worker pair.
pub fn channel() -> (WorkerLink, WorkerEndpoint) {
    let (host_tx, worker_rx) = unbounded();
    let (worker_tx, host_rx) = unbounded();
    (
        WorkerLink {
            outbound: host_tx,
            inbound: host_rx,
        },
        WorkerEndpoint {
            inbound: worker_rx,
            outbound: worker_tx,
        },
    )
}

/// Host side of the link.
pub struct WorkerLink {
    outbound: Sender<HostMessage>,
    inbound: Receiver<WorkerMessage>,
}

impl WorkerLink {
    /// Post a message. Ownership of any buffers inside moves to the worker.
    pub fn post(&self, msg: HostMessage) -> Result<(), Disconnected> {
        match &msg {
            HostMessage::RunFrame(_) => trace!("-> {}", msg.name()),
            _ => debug!("-> {}", msg.name()),
        }
        self.outbound.send(msg).map_err(|_| Disconnected)
    }

    /// Next inbound message if one is queued.
    pub fn try_recv(&self) -> Result<Option<WorkerMessage>, Disconnected> {
        match self.inbound.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    /// Block until the worker sends something.
    pub fn recv(&self) -> Result<WorkerMessage, Disconnected> {
        self.inbound.recv().map_err(|_| Disconnected)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>, Disconnected> {
        match self.inbound.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }
}

/// Worker side of the link.
pub struct WorkerEndpoint {
    inbound: Receiver<HostMessage>,
    outbound: Sender<WorkerMessage>,
}

impl WorkerEndpoint {
    /// Block for the next host message; `None` once the host is gone.
    pub fn recv(&self) -> Option<HostMessage> {
        self.inbound.recv().ok()
    }

    pub fn try_recv(&self) -> Option<HostMessage> {
        self.inbound.try_recv().ok()
    }

    /// Everything the host has posted so far.
    pub fn drain(&self) -> Vec<HostMessage> {
        self.inbound.try_iter().collect()
    }

    pub fn send(&self, msg: WorkerMessage) -> Result<(), Disconnected> {
        self.outbound.send(msg).map_err(|_| Disconnected)
    }
}
