//! Observer registry for emulator state changes.
//!
//! Subscribers register per [`EventKind`] and only see events published after
//! they subscribed; nothing is replayed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::machine::{MachineType, TapeAutoLoadMode};
use crate::protocol::{LoadId, MediaType};

/// Something observers may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready,
    Start,
    Pause,
    MachineChanged(MachineType),
    AutoLoadTapesChanged(bool),
    TapeAutoLoadModeChanged(TapeAutoLoadMode),
    FileOpened { id: LoadId, media_type: MediaType },
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Start,
    Pause,
    MachineChanged,
    AutoLoadTapesChanged,
    TapeAutoLoadModeChanged,
    FileOpened,
    Exit,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Start => EventKind::Start,
            Event::Pause => EventKind::Pause,
            Event::MachineChanged(_) => EventKind::MachineChanged,
            Event::AutoLoadTapesChanged(_) => EventKind::AutoLoadTapesChanged,
            Event::TapeAutoLoadModeChanged(_) => EventKind::TapeAutoLoadModeChanged,
            Event::FileOpened { .. } => EventKind::FileOpened,
            Event::Exit => EventKind::Exit,
        }
    }
}

pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Callback)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(SubscriptionId, Callback)>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers();
        for callbacks in observers.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(sub, _)| *sub == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to its current subscribers. Callbacks run without the
    /// registry lock held, so they may subscribe or unsubscribe.
    pub fn publish(&self, event: &Event) {
        let callbacks: Vec<Callback> = self
            .observers()
            .get(&event.kind())
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.observers().get(&kind).map_or(0, Vec::len)
    }
}
