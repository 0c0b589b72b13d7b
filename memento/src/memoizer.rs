//! The memoizer: cache lookup, deduplicated computation, write-back.

use std::fmt;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use memento_core::error::{BoxError, MemoError, Result};
use memento_core::traits::{CacheBackend, ListenerId};

use crate::config::{MemoizerBuilder, MemoizerConfig};
use crate::memoize_fn::MemoizedFn;
use crate::metrics::Metrics;
use crate::singleflight::SingleFlight;

/// Caches the results of expensive computations by key.
///
/// Cloning is cheap and shares the backend, the in-flight table and the
/// metrics.
pub struct Memoizer<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    config: MemoizerConfig<V>,
    backend: Arc<dyn CacheBackend<V>>,
    flights: SingleFlight<V>,
    metrics: Arc<Metrics>,
    /// Eviction listener installed on the backend, removed on drop
    listener: Option<ListenerId>,
}

impl<V> Memoizer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Validates `config` and creates a memoizer.
    ///
    /// # Errors
    ///
    /// [`MemoError::MissingBackend`] without a backend and
    /// [`MemoError::InvalidTtl`] for a zero TTL.
    pub fn new(config: MemoizerConfig<V>) -> Result<Self> {
        config.validate()?;
        let backend = config.backend.clone().ok_or(MemoError::MissingBackend)?;

        let metrics = Arc::new(Metrics::new(config.metrics_enabled));
        let evictions = Arc::clone(&metrics);
        let listener = backend.add_eviction_listener(Arc::new(move |key: &str| {
            trace!(key, "Entry evicted");
            evictions.record_eviction();
        }));

        debug!(backend = backend.name(), ttl = ?config.ttl, "Memoizer created");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backend,
                flights: SingleFlight::new(),
                metrics,
                listener,
            }),
        })
    }

    /// Starts a [`MemoizerBuilder`].
    pub fn builder() -> MemoizerBuilder<V> {
        MemoizerBuilder::new()
    }

    /// Returns the cached value for `key`, computing and caching it on a miss.
    ///
    /// Concurrent misses on the same key share a single run of `compute`;
    /// its error, if any, is returned to each of them and nothing is cached.
    pub async fn get<F, Fut, E>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.get_with_cancel(key, pending(), compute).await
    }

    /// Like [`get`](Self::get), giving up with [`MemoError::Cancelled`] once
    /// `cancel` resolves.
    ///
    /// Cancelling never stops the computation itself; it finishes in the
    /// background and still fills the cache unless `cache_on_cancel` is off.
    #[instrument(skip(self, cancel, compute), fields(backend = self.inner.backend.name()))]
    pub async fn get_with_cancel<C, F, Fut, E>(&self, key: &str, cancel: C, compute: F) -> Result<V>
    where
        C: Future<Output = ()>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let inner = &self.inner;

        if let Some(value) = inner.backend.get(key).await {
            inner.metrics.record_hit();
            debug!("Cache hit");
            return Ok(value);
        }
        inner.metrics.record_miss();
        debug!("Cache miss");

        let started = Instant::now();
        let backend = Arc::clone(&inner.backend);
        let ttl = inner.config.ttl;
        let cache_on_cancel = inner.config.cache_on_cancel;

        let (result, owner) = inner
            .flights
            .run(key, cancel, move |ctx| async move {
                // Another call may have filled the slot since the first lookup.
                if let Some(value) = backend.get(ctx.key()).await {
                    return Ok(value);
                }

                let value = match compute().await {
                    Ok(value) => value,
                    Err(err) => return Err(MemoError::computation(err)),
                };

                if cache_on_cancel || !ctx.owner_cancelled() {
                    backend.set(ctx.key(), value.clone(), Some(ttl)).await;
                } else {
                    debug!(key = ctx.key(), "Owner cancelled, result not cached");
                }
                Ok(value)
            })
            .await;

        inner.metrics.record_latency(started.elapsed());
        debug!(owner, ok = result.is_ok(), "Miss resolved");
        result
    }

    /// Removes `key` from the cache. In-flight computations are unaffected.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) {
        self.inner.backend.delete(key).await;
    }

    /// Empties the cache. In-flight computations are unaffected.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        self.inner.backend.clear().await;
    }

    /// Wraps `func` so each call is memoized by its hashed arguments.
    pub fn memoize_fn<A, F, Fut, E>(&self, func: F) -> MemoizedFn<A, V, F>
    where
        A: Serialize + fmt::Debug + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        MemoizedFn::new(self.clone(), func)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend<V>> {
        &self.inner.backend
    }

    pub fn config(&self) -> &MemoizerConfig<V> {
        &self.inner.config
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Stops the backend's background work.
    pub fn shutdown(&self) {
        debug!(backend = self.inner.backend.name(), "Shutting down memoizer");
        self.inner.backend.shutdown();
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.backend.remove_eviction_listener(id);
        }
    }
}

impl<V> Clone for Memoizer<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Memoizer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("config", &self.inner.config)
            .field("metrics", &self.inner.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::{ready, Ready};
    use tokio::sync::{oneshot, Barrier};
    use tokio::task::JoinSet;

    use memento_backends::MemoryBackend;

    type Outcome = std::result::Result<u32, BoxError>;

    fn memoizer(ttl: Duration, metrics: bool) -> Memoizer<u32> {
        Memoizer::builder()
            .backend(Arc::new(MemoryBackend::<u32>::without_sweep()))
            .ttl(ttl)
            .metrics(metrics)
            .build()
            .unwrap()
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> Ready<Outcome> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ready(Ok(value))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let memo = memoizer(Duration::from_secs(60), true);
        let executions = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(50));
        let mut tasks = JoinSet::new();

        for _ in 0..50 {
            let memo = memo.clone();
            let executions = Arc::clone(&executions);
            let barrier = Arc::clone(&barrier);
            tasks.spawn(async move {
                barrier.wait().await;
                memo.get("shared", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, io::Error>(99)
                })
                .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), 99);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(memo.in_flight(), 0);
        assert_eq!(memo.metrics().requests(), 50);
    }

    #[tokio::test]
    async fn test_hit_skips_computation() {
        let memo = memoizer(Duration::from_secs(60), false);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        assert_eq!(memo.get("key", counting(&first, 1)).await.unwrap(), 1);
        assert_eq!(memo.get("key", counting(&second, 2)).await.unwrap(), 1);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry_recomputes() {
        let memo = memoizer(Duration::from_millis(100), true);
        let calls = Arc::new(AtomicUsize::new(0));

        memo.get("key", counting(&calls, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        memo.get("key", counting(&calls, 1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.metrics().evictions(), 1);
    }

    #[tokio::test]
    async fn test_shared_backend_credits_every_memoizer() {
        let backend = Arc::new(MemoryBackend::<u32>::without_sweep());
        let build = || {
            Memoizer::builder()
                .backend(backend.clone())
                .ttl(Duration::from_millis(10))
                .metrics(true)
                .build()
                .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(backend.listener_count(), 2);

        let calls = Arc::new(AtomicUsize::new(0));
        first.get("key", counting(&calls, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.get("key", counting(&calls, 1)).await.unwrap();

        // Evictions are a backend event, seen by every memoizer on it.
        assert_eq!(first.metrics().evictions(), 1);
        assert_eq!(second.metrics().evictions(), 1);

        drop(second);
        assert_eq!(backend.listener_count(), 1);

        let clone = first.clone();
        drop(first);
        assert_eq!(backend.listener_count(), 1);
        drop(clone);
        assert_eq!(backend.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_recomputes() {
        let memo = memoizer(Duration::from_secs(60), false);
        let calls = Arc::new(AtomicUsize::new(0));

        memo.get("key", counting(&calls, 1)).await.unwrap();
        memo.delete("key").await;
        memo.get("key", counting(&calls, 1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_recomputes_every_key() {
        let memo = memoizer(Duration::from_secs(60), false);
        let calls = Arc::new(AtomicUsize::new(0));

        memo.get("a", counting(&calls, 1)).await.unwrap();
        memo.get("b", counting(&calls, 2)).await.unwrap();
        memo.clear().await;
        memo.get("a", counting(&calls, 1)).await.unwrap();
        memo.get("b", counting(&calls, 2)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_metrics_accounting() {
        let memo = memoizer(Duration::from_secs(60), true);
        let calls = Arc::new(AtomicUsize::new(0));

        memo.get("key", counting(&calls, 1)).await.unwrap();
        memo.get("key", counting(&calls, 1)).await.unwrap();

        let snapshot = memo.metrics().snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hit_ratio(), 0.5);
        assert_eq!(snapshot.latency_count, 1);
    }

    #[tokio::test]
    async fn test_metrics_disabled_stay_zero() {
        let memo = memoizer(Duration::from_secs(60), false);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            memo.get("key", counting(&calls, 1)).await.unwrap();
        }

        let snapshot = memo.metrics().snapshot();
        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.hit_ratio(), 0.0);
        assert_eq!(snapshot.avg_latency(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_errors_are_returned_and_not_cached() {
        let memo = memoizer(Duration::from_secs(60), false);

        let err = memo
            .get("key", || async {
                Err::<u32, _>(io::Error::new(io::ErrorKind::Other, "test error"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "test error");
        assert!(err.is_computation_error());
        assert_eq!(
            err.downcast_computation::<io::Error>().map(io::Error::kind),
            Some(io::ErrorKind::Other)
        );

        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(memo.get("key", counting(&calls, 3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_shared_by_concurrent_callers() {
        let memo = memoizer(Duration::from_secs(60), false);
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..10 {
            let memo = memo.clone();
            let executions = Arc::clone(&executions);
            tasks.spawn(async move {
                memo.get("key", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<u32, _>("shared failure")
                })
                .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap_err().to_string(), "shared failure");
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_cancellation_keeps_owner_running() {
        let memo = memoizer(Duration::from_secs(60), false);
        let executions = Arc::new(AtomicUsize::new(0));
        let (release, released) = oneshot::channel::<()>();

        let owner = {
            let memo = memo.clone();
            let executions = Arc::clone(&executions);
            tokio::spawn(async move {
                memo.get("key", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    let _ = released.await;
                    Ok::<_, io::Error>(7)
                })
                .await
            })
        };
        while memo.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let err = memo
            .get_with_cancel(
                "key",
                tokio::time::sleep(Duration::from_millis(20)),
                || async { Ok::<_, io::Error>(0) },
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        release.send(()).unwrap();
        assert_eq!(owner.await.unwrap().unwrap(), 7);

        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(memo.get("key", counting(&calls, 0)).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_owner_still_caches_by_default() {
        let memo = memoizer(Duration::from_secs(60), false);

        let err = memo
            .get_with_cancel("key", tokio::time::sleep(Duration::from_millis(10)), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, io::Error>(11)
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(memo.backend().get("key").await, Some(11));
    }

    #[tokio::test]
    async fn test_cancelled_owner_skips_cache_when_disabled() {
        let memo = Memoizer::builder()
            .backend(Arc::new(MemoryBackend::<u32>::without_sweep()))
            .cache_on_cancel(false)
            .build()
            .unwrap();

        let err = memo
            .get_with_cancel("key", tokio::time::sleep(Duration::from_millis(10)), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, io::Error>(11)
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(memo.in_flight(), 0);
        assert_eq!(memo.backend().get("key").await, None);
    }

    #[tokio::test]
    async fn test_panicking_computation_aborts() {
        let memo = memoizer(Duration::from_secs(60), false);

        let err = memo
            .get("key", || async {
                if true {
                    panic!("boom");
                }
                Ok::<u32, io::Error>(0)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MemoError::ComputationAborted(_)));
        assert!(err.is_computation_error());
        assert_eq!(memo.in_flight(), 0);
    }

    #[test]
    fn test_missing_backend_rejected() {
        let err = Memoizer::<u32>::builder().build().unwrap_err();
        assert!(matches!(err, MemoError::MissingBackend));
        assert_eq!(err.to_string(), "backend cannot be nil");
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = Memoizer::builder()
            .backend(Arc::new(MemoryBackend::<u32>::without_sweep()))
            .ttl(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, MemoError::InvalidTtl(_)));
    }

    #[tokio::test]
    async fn test_new_from_config() {
        let config = MemoizerConfig {
            backend: Some(Arc::new(MemoryBackend::<u32>::without_sweep()) as Arc<dyn CacheBackend<u32>>),
            metrics_enabled: true,
            ..MemoizerConfig::default()
        };
        let memo = Memoizer::new(config).unwrap();

        assert!(memo.metrics().is_enabled());
        assert_eq!(memo.config().ttl, Duration::from_secs(3600));
        assert_eq!(memo.backend().name(), "memory");
        memo.shutdown();
    }
}
