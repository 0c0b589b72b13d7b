//! Eviction listener bookkeeping shared by the bundled backends.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use memento_core::traits::{EvictionListener, ListenerId};

/// Set of eviction listeners, each addressable by the id it was added under.
#[derive(Default)]
pub(crate) struct EvictionListeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, EvictionListener)>>,
}

impl EvictionListeners {
    pub(crate) fn add(&self, listener: EvictionListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.entries.write().retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Calls every listener with `key`.
    ///
    /// Listeners run outside the lock, so one may add or remove listeners.
    pub(crate) fn notify(&self, key: &str) {
        let listeners: Vec<EvictionListener> = self
            .entries
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(key);
        }
    }
}
