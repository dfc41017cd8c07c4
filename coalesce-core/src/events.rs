//! Lifecycle notification fan-out.
//!
//! Listeners register per [`EventKind`] (or for every kind). Emission is
//! fire-and-forget: a listener that panics is logged and skipped, and having
//! no listener at all is the normal case.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::types::{CacheEvent, EventKind};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer registry keyed by event kind.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl Notifier {
    /// Creates a notifier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Registers a single listener for every kind of event.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: Listener = Arc::new(listener);
        let mut listeners = self.listeners.write();
        for kind in EventKind::ALL {
            listeners
                .entry(kind)
                .or_default()
                .push((id, Arc::clone(&listener)));
        }
        id
    }

    /// Removes a subscription. Returns true if anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for entries in self.listeners.write().values_mut() {
            let before = entries.len();
            entries.retain(|(sid, _)| *sid != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Delivers an event to every listener of its kind.
    pub fn emit(&self, event: CacheEvent) {
        // Snapshot so listeners may (un)subscribe re-entrantly.
        let targets: Vec<Listener> = match self.listeners.read().get(&event.kind()) {
            Some(entries) if !entries.is_empty() => {
                entries.iter().map(|(_, l)| Arc::clone(l)).collect()
            }
            _ => return,
        };

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(kind = ?event.kind(), "event listener panicked");
            }
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("Notifier")
            .field("kinds", &listeners.len())
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
