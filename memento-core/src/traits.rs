//! Common traits for memento.
//!
//! These traits define the interfaces that different implementations can satisfy,
//! enabling modularity and testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Callback invoked with the key of every entry a backend reaps because it expired.
pub type EvictionListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle identifying one installed [`EvictionListener`].
pub type ListenerId = u64;

/// Pluggable key → value storage used by the memoizer.
///
/// Implementations might use:
/// - In-memory storage (the reference backend)
/// - Local files
/// - A remote key-value store
///
/// # Contract
///
/// - `get` returns `None` for absent *and* for expired entries; an expired
///   entry found by `get` is removed as a side effect.
/// - `set` overwrites unconditionally and always bumps the slot's version.
/// - Storage failures are never surfaced: they are logged by the backend and
///   degrade to a miss, so an outage turns into recomputation.
#[async_trait]
pub trait CacheBackend<V>: Send + Sync {
    /// Looks up a live value.
    async fn get(&self, key: &str) -> Option<V>;

    /// Stores a value. `None` or a zero TTL means the value never expires.
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Removes a value.
    async fn delete(&self, key: &str);

    /// Removes every value.
    async fn clear(&self);

    /// Short human-readable backend name (used in logs).
    fn name(&self) -> &'static str {
        "custom"
    }

    /// Adds a callback fired for each expired entry the backend reaps.
    ///
    /// Every installed listener sees every eviction, so several memoizers
    /// can share one backend. Returns `None` when the backend cannot observe
    /// expiry.
    fn add_eviction_listener(&self, _listener: EvictionListener) -> Option<ListenerId> {
        None
    }

    /// Removes a listener added by [`add_eviction_listener`](Self::add_eviction_listener).
    ///
    /// Unknown ids are ignored.
    fn remove_eviction_listener(&self, _id: ListenerId) {}

    /// Configured background sweep cadence, `None` when the backend has no sweep.
    fn sweep_interval(&self) -> Option<Duration> {
        None
    }

    /// Stops any background work owned by the backend.
    fn shutdown(&self) {}
}
