//! In-memory cache backend.
//!
//! Fast, thread-safe storage suitable for single-process deployments and
//! testing. Expired entries are reaped eagerly on read and periodically by a
//! background sweep task owned by the backend.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use memento_core::constants::{DEFAULT_SWEEP_INTERVAL, INITIAL_VERSION};
use memento_core::traits::{CacheBackend, EvictionListener, ListenerId};
use memento_core::types::{now_nanos, BackendStats, CacheEntry};

use crate::listeners::EvictionListeners;

/// In-memory cache backend.
///
/// Entries live in a [`DashMap`]; reads, writes and the background sweep
/// all go through the map's shard locks, so the sweep never observes a
/// partially written entry.
///
/// # Background Sweep
///
/// When created inside a tokio runtime, the backend spawns a task that calls
/// [`purge_expired`](Self::purge_expired) every `cleanup_interval`. The task
/// stops on [`shutdown`](CacheBackend::shutdown) or when the backend is
/// dropped. Outside a runtime no task is started and expired entries are
/// only reaped on read.
pub struct MemoryBackend<V> {
    store: Arc<MemoryStore<V>>,
    sweeper: Mutex<Option<Sweeper>>,
    cleanup_interval: Duration,
}

struct MemoryStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    listeners: EvictionListeners,
}

struct Sweeper {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl<V> MemoryBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a backend sweeping every [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new() -> Self {
        Self::with_cleanup_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a backend with a custom sweep cadence.
    ///
    /// A zero interval disables the background sweep.
    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        let backend = Self::without_sweep_inner(cleanup_interval);
        if !cleanup_interval.is_zero() {
            backend.start_sweeper();
        }
        backend
    }

    /// Creates a backend that only reaps expired entries on read.
    pub fn without_sweep() -> Self {
        Self::without_sweep_inner(Duration::ZERO)
    }

    fn without_sweep_inner(cleanup_interval: Duration) -> Self {
        Self {
            store: Arc::new(MemoryStore {
                entries: DashMap::new(),
                listeners: EvictionListeners::default(),
            }),
            sweeper: Mutex::new(None),
            cleanup_interval,
        }
    }

    fn start_sweeper(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available, background sweep disabled");
                return;
            }
        };

        let (stop, mut stopped) = oneshot::channel();
        let store = Arc::downgrade(&self.store);
        let period = self.cleanup_interval;

        let handle = runtime.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?period, "Memory backend sweep started");

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(store) = Weak::upgrade(&store) else { break };
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Swept expired entries");
                        }
                    }
                }
            }

            info!("Memory backend sweep stopped");
        });

        *self.sweeper.lock() = Some(Sweeper { stop, handle });
    }

    /// Returns true while the background sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map_or(false, |sweeper| !sweeper.handle.is_finished())
    }

    /// Returns the configured sweep cadence (zero when disabled).
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Returns the number of installed eviction listeners.
    pub fn listener_count(&self) -> usize {
        self.store.listeners.len()
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    /// Resets the expiry of a live entry without touching its value or version.
    ///
    /// Returns false if the key is absent or already expired.
    pub fn refresh(&self, key: &str, ttl: Option<Duration>) -> bool {
        match self.store.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                entry.set_expiry(ttl);
                true
            }
            _ => false,
        }
    }

    /// Returns a snapshot of the live entry stored under `key`.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.store
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value().clone())
    }

    /// Returns the number of stored entries (including expired ones not yet reaped).
    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }

    /// Returns occupancy statistics.
    pub fn stats(&self) -> BackendStats {
        let now = now_nanos();
        let mut total = 0;
        let mut expired = 0;
        for entry in self.store.entries.iter() {
            total += 1;
            if entry.value().is_expired_at(now) {
                expired += 1;
            }
        }
        BackendStats::new(total, expired)
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        let now = now_nanos();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired_at(now) {
                return Some(entry.value().value().clone());
            }
        }

        // The read guard is released above; removing under it would deadlock the shard.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired_at(now))
            .is_some()
        {
            debug!(key, "Reaped expired entry on read");
            self.notify_evicted(key);
        }
        None
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> u64 {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let version = slot.get().bump_version();
                slot.insert(CacheEntry::new(value, ttl, version));
                version
            }
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry::new(value, ttl, INITIAL_VERSION));
                INITIAL_VERSION
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let now = now_nanos();
        let mut evicted = Vec::new();

        self.entries.retain(|key, entry| {
            if entry.is_expired_at(now) {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });

        for key in &evicted {
            self.notify_evicted(key);
        }
        evicted.len()
    }

    fn notify_evicted(&self, key: &str) {
        self.listeners.notify(key);
    }
}

impl<V> Default for MemoryBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for MemoryBackend<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.store.entries.len())
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

impl<V> Drop for MemoryBackend<V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            let _ = sweeper.stop.send(());
        }
    }
}

#[async_trait]
impl<V> CacheBackend<V> for MemoryBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let version = self.store.set(key, value, ttl);
        debug!(key, version, "Stored entry");
    }

    async fn delete(&self, key: &str) {
        self.store.entries.remove(key);
    }

    async fn clear(&self) {
        self.store.entries.clear();
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn add_eviction_listener(&self, listener: EvictionListener) -> Option<ListenerId> {
        Some(self.store.listeners.add(listener))
    }

    fn remove_eviction_listener(&self, id: ListenerId) {
        self.store.listeners.remove(id);
    }

    fn sweep_interval(&self) -> Option<Duration> {
        Some(self.cleanup_interval).filter(|interval| !interval.is_zero())
    }

    fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.stop.send(());
            debug!("Memory backend sweep shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::without_sweep();
        backend.set("key1", "value1".to_string(), None).await;

        assert_eq!(backend.get("key1").await.as_deref(), Some("value1"));
        assert!(backend.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let backend = MemoryBackend::without_sweep();
        backend.set("key", 1u32, None).await;
        assert_eq!(backend.entry("key").unwrap().version(), INITIAL_VERSION);

        backend.set("key", 2u32, None).await;
        backend.set("key", 3u32, None).await;

        let entry = backend.entry("key").unwrap();
        assert_eq!(*entry.value(), 3);
        assert_eq!(entry.version(), INITIAL_VERSION + 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_purged_on_read() {
        let backend = MemoryBackend::without_sweep();
        backend.set("key", 1u32, Some(Duration::from_millis(1))).await;
        assert_eq!(backend.len(), 1);

        tokio::time::sleep(SHORT).await;

        assert!(backend.get("key").await.is_none());
        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_no_ttl_never_expires() {
        let backend = MemoryBackend::without_sweep();
        backend.set("forever", 7u8, None).await;
        backend.set("zero", 8u8, Some(Duration::ZERO)).await;

        tokio::time::sleep(SHORT).await;

        assert_eq!(backend.get("forever").await, Some(7));
        assert_eq!(backend.get("zero").await, Some(8));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let backend = MemoryBackend::without_sweep();
        backend.set("a", 1u32, None).await;
        backend.set("b", 2u32, None).await;

        backend.delete("a").await;
        assert!(backend.get("a").await.is_none());
        assert_eq!(backend.get("b").await, Some(2));

        backend.delete("a").await;

        backend.clear().await;
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_and_stats() {
        let backend = MemoryBackend::without_sweep();
        backend.set("short", 1u32, Some(Duration::from_millis(1))).await;
        backend.set("long", 2u32, Some(Duration::from_secs(60))).await;

        tokio::time::sleep(SHORT).await;

        let stats = backend.stats();
        assert_eq!(stats, BackendStats::new(2, 1));

        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("long").await, Some(2));
    }

    #[tokio::test]
    async fn test_eviction_listener_sees_reaped_keys() {
        let backend: MemoryBackend<u32> = MemoryBackend::without_sweep();
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evicted);
        backend.add_eviction_listener(Arc::new(move |_key: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        backend.set("a", 1u32, Some(Duration::from_millis(1))).await;
        backend.set("b", 2u32, Some(Duration::from_millis(1))).await;
        backend.set("c", 3u32, None).await;
        tokio::time::sleep(SHORT).await;

        assert!(backend.get("a").await.is_none());
        assert_eq!(evicted.load(Ordering::SeqCst), 1);

        backend.purge_expired();
        assert_eq!(evicted.load(Ordering::SeqCst), 2);

        backend.delete("c").await;
        assert_eq!(evicted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_eviction_reaches_every_listener() {
        let backend: MemoryBackend<u32> = MemoryBackend::without_sweep();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&first);
        let first_id = backend
            .add_eviction_listener(Arc::new(move |_key: &str| {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let b = Arc::clone(&second);
        backend.add_eviction_listener(Arc::new(move |_key: &str| {
            b.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(backend.listener_count(), 2);

        backend.set("a", 1, Some(Duration::from_millis(1))).await;
        tokio::time::sleep(SHORT).await;
        assert!(backend.get("a").await.is_none());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        backend.remove_eviction_listener(first_id);
        backend.set("b", 2, Some(Duration::from_millis(1))).await;
        tokio::time::sleep(SHORT).await;
        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_resets_expiry() {
        let backend = MemoryBackend::without_sweep();
        backend.set("key", 1u32, Some(Duration::from_millis(50))).await;

        assert!(backend.refresh("key", Some(Duration::from_secs(60))));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(backend.get("key").await, Some(1));
        assert_eq!(backend.entry("key").unwrap().version(), INITIAL_VERSION);
        assert!(!backend.refresh("missing", None));
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired() {
        let backend = MemoryBackend::with_cleanup_interval(Duration::from_millis(10));
        assert!(backend.is_sweeping());

        backend.set("key", 1u32, Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweep() {
        let backend: MemoryBackend<u32> = MemoryBackend::with_cleanup_interval(Duration::from_millis(10));
        assert!(backend.is_sweeping());

        backend.shutdown();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!backend.is_sweeping());

        backend.set("key", 1, Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_without_runtime_has_no_sweep() {
        let backend: MemoryBackend<u32> = MemoryBackend::new();
        assert!(!backend.is_sweeping());
        assert_eq!(backend.cleanup_interval(), DEFAULT_SWEEP_INTERVAL);
        assert_eq!(backend.sweep_interval(), Some(DEFAULT_SWEEP_INTERVAL));

        let disabled: MemoryBackend<u32> = MemoryBackend::without_sweep();
        assert_eq!(disabled.sweep_interval(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_with_sweep() {
        use tokio::task::JoinSet;

        let backend = Arc::new(MemoryBackend::with_cleanup_interval(Duration::from_millis(1)));
        let mut tasks = JoinSet::new();

        for i in 0..100u32 {
            let backend = Arc::clone(&backend);
            tasks.spawn(async move {
                let key = format!("key-{}", i % 10);
                backend.set(&key, i, Some(Duration::from_millis(5))).await;
                let _ = backend.get(&key).await;
                if i % 7 == 0 {
                    backend.delete(&key).await;
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.len(), 0);
    }
}
