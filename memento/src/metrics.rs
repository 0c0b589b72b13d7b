//! Lock-free hit/miss and latency counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Collector shared by a memoizer and everything reading its statistics.
///
/// Every counter is an independent atomic; readers may observe momentarily
/// inconsistent combinations (e.g. `hits > requests`) under heavy load.
#[derive(Debug)]
pub struct Metrics {
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    requests: AtomicU64,
    latency_sum: AtomicU64,
    latency_count: AtomicU64,
    latency_min: AtomicU64,
    latency_max: AtomicU64,
    latency_last: AtomicU64,
}

impl Metrics {
    /// Creates a collector, recording only if `enabled`.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_min: AtomicU64::new(u64::MAX),
            latency_max: AtomicU64::new(0),
            latency_last: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turns recording on or off. Counters already collected are kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECORDING
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_hit(&self) {
        if self.is_enabled() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self) {
        if self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_eviction(&self) {
        if self.is_enabled() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the duration of one miss path.
    pub fn record_latency(&self, latency: Duration) {
        if !self.is_enabled() {
            return;
        }

        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_sum.fetch_add(nanos, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_last.store(nanos, Ordering::Relaxed);

        let mut current = self.latency_min.load(Ordering::Relaxed);
        while nanos < current {
            match self.latency_min.compare_exchange_weak(
                current,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut current = self.latency_max.load(Ordering::Relaxed);
        while nanos > current {
            match self.latency_max.compare_exchange_weak(
                current,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.requests,
            &self.latency_sum,
            &self.latency_count,
            &self.latency_max,
            &self.latency_last,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latency_min.store(u64::MAX, Ordering::Relaxed);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READING
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fraction of requests served from the cache.
    ///
    /// 0.0 when nothing was recorded or while recording is disabled.
    pub fn hit_ratio(&self) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        ratio(self.hits(), self.requests())
    }

    /// Mean miss-path latency, zero when nothing was recorded or while disabled.
    pub fn avg_latency(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        average(
            self.latency_sum.load(Ordering::Relaxed),
            self.latency_count.load(Ordering::Relaxed),
        )
    }

    pub fn min_latency(&self) -> Duration {
        match self.latency_min.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            nanos => self.gated(Duration::from_nanos(nanos)),
        }
    }

    pub fn max_latency(&self) -> Duration {
        self.gated(Duration::from_nanos(self.latency_max.load(Ordering::Relaxed)))
    }

    pub fn last_latency(&self) -> Duration {
        self.gated(Duration::from_nanos(self.latency_last.load(Ordering::Relaxed)))
    }

    fn gated(&self, latency: Duration) -> Duration {
        if self.is_enabled() {
            latency
        } else {
            Duration::ZERO
        }
    }

    /// Copies every counter; fields are read independently.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enabled: self.is_enabled(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            requests: self.requests(),
            total_latency_ns: self.latency_sum.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            min_latency_ns: match self.latency_min.load(Ordering::Relaxed) {
                u64::MAX => 0,
                nanos => nanos,
            },
            max_latency_ns: self.latency_max.load(Ordering::Relaxed),
            last_latency_ns: self.latency_last.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(false)
    }
}

fn ratio(hits: u64, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        hits as f64 / requests as f64
    }
}

fn average(sum: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(sum / count)
    }
}

/// Point-in-time copy of a [`Metrics`] collector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub requests: u64,
    pub total_latency_ns: u64,
    pub latency_count: u64,
    pub min_latency_ns: u64,
    pub max_latency_ns: u64,
    pub last_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Derived statistics read as zero for a snapshot of disabled metrics.
    pub fn hit_ratio(&self) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        ratio(self.hits, self.requests)
    }

    pub fn avg_latency(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        average(self.total_latency_ns, self.latency_count)
    }

    pub fn min_latency(&self) -> Duration {
        self.gated(self.min_latency_ns)
    }

    pub fn max_latency(&self) -> Duration {
        self.gated(self.max_latency_ns)
    }

    pub fn last_latency(&self) -> Duration {
        self.gated(self.last_latency_ns)
    }

    fn gated(&self, nanos: u64) -> Duration {
        if self.enabled {
            Duration::from_nanos(nanos)
        } else {
            Duration::ZERO
        }
    }
}
