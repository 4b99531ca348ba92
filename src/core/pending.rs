//! Correlation table for in-flight load requests.
//!
//! Every load gets a fresh id from a monotonically increasing counter. The
//! id travels with the request and comes back in the worker's `FileOpened`
//! reply, which is how the reply finds its way to the right [`LoadHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, warn};

use crate::error::LoadError;
use crate::protocol::{LoadId, LoadKind, MediaType};

/// Successful completion of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub media_type: MediaType,
}

pub type LoadResult = Result<LoadOutcome, LoadError>;

/// Caller side of a load request. Resolves exactly once.
#[derive(Debug)]
pub struct LoadHandle {
    id: Option<LoadId>,
    result: Receiver<LoadResult>,
}

impl LoadHandle {
    /// A handle that is already failed; used for errors caught before an id
    /// was allocated.
    pub(crate) fn failed(err: LoadError) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(Err(err));
        Self { id: None, result: rx }
    }

    /// Correlation id, if the request got as far as the worker.
    pub fn id(&self) -> Option<LoadId> {
        self.id
    }

    fn abandoned_error(&self) -> LoadError {
        LoadError::Abandoned(self.id.unwrap_or_default())
    }

    /// Block until the load resolves.
    pub fn wait(self) -> LoadResult {
        match self.result.recv() {
            Ok(result) => result,
            Err(_) => Err(self.abandoned_error()),
        }
    }

    /// Block for at most `timeout`; hands the handle back if still pending.
    pub fn wait_timeout(self, timeout: Duration) -> Result<LoadResult, LoadHandle> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(self.abandoned_error())),
        }
    }

    /// Take the result if it is ready; hands the handle back otherwise.
    pub fn try_wait(self) -> Result<LoadResult, LoadHandle> {
        match self.result.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Disconnected) => Ok(Err(self.abandoned_error())),
        }
    }
}

/// Resolver side of a pending load, taken out of the table on completion.
#[derive(Debug)]
pub struct LoadResolver {
    id: LoadId,
    tx: Sender<LoadResult>,
}

impl LoadResolver {
    pub fn resolve(self, result: LoadResult) {
        if self.tx.send(result).is_err() {
            debug!("load {} resolved after its handle was dropped", self.id);
        }
    }
}

#[derive(Debug)]
struct PendingLoad {
    kind: LoadKind,
    resolver: LoadResolver,
}

/// Ids of loads that have been sent but not yet answered.
#[derive(Debug, Default)]
pub struct PendingLoads {
    next_id: AtomicU64,
    table: Mutex<HashMap<LoadId, PendingLoad>>,
}

impl PendingLoads {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<LoadId, PendingLoad>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and record a resolver for it.
    pub fn register(&self, kind: LoadKind) -> (LoadId, LoadHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        let previous = self.table().insert(
            id,
            PendingLoad {
                kind,
                resolver: LoadResolver { id, tx },
            },
        );
        debug_assert!(previous.is_none(), "load id {} reused", id);
        debug!("registered {:?} load {}", kind, id);
        (id, LoadHandle { id: Some(id), result: rx })
    }

    /// Remove the entry for `id`; `None` for ids never issued or already
    /// completed.
    pub fn take(&self, id: LoadId) -> Option<(LoadKind, LoadResolver)> {
        let entry = self.table().remove(&id);
        if entry.is_none() {
            warn!("no pending load with id {}", id);
        }
        entry.map(|p| (p.kind, p.resolver))
    }

    /// Fail a single pending load.
    pub fn fail(&self, id: LoadId, err: LoadError) {
        let entry = self.table().remove(&id);
        if let Some(pending) = entry {
            pending.resolver.resolve(Err(err));
        }
    }

    /// Drop every pending resolver; waiting handles see `Abandoned`.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<_> = self.table().drain().collect();
        if !drained.is_empty() {
            debug!("abandoning {} pending loads", drained.len());
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
