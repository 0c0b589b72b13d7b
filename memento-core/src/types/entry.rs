//! Time-bounded cache entry.
//!
//! A [`CacheEntry`] couples a stored value with an absolute expiry and a
//! write version. Both metadata fields are atomic cells owned by the slot
//! that holds the entry, so they can be refreshed through a shared reference.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::NO_EXPIRY;

/// A stored value plus its expiry timestamp and version counter.
///
/// # Expiry
///
/// `expiry` is an absolute Unix timestamp in nanoseconds. [`NO_EXPIRY`]
/// (zero) means the entry never expires. For a fixed clock reading,
/// [`is_expired_at`](Self::is_expired_at) is pure, and once an entry reads as
/// expired it stays expired for every later reading unless
/// [`set_expiry`](Self::set_expiry) is called.
///
/// # Cloning
///
/// `Clone` takes a snapshot: the current expiry and version are loaded and
/// placed in new cells. The clone never shares atomics with the original.
pub struct CacheEntry<V> {
    value: V,
    expiry: AtomicI64,
    version: AtomicU64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry that expires `ttl` from now.
    ///
    /// `None` or a zero duration means no expiration.
    pub fn new(value: V, ttl: Option<Duration>, version: u64) -> Self {
        Self {
            value,
            expiry: AtomicI64::new(expiry_from_now(ttl)),
            version: AtomicU64::new(version),
        }
    }

    /// Rebuilds an entry from stored parts (absolute expiry in Unix nanoseconds).
    pub fn from_parts(value: V, expires_at: i64, version: u64) -> Self {
        Self {
            value,
            expiry: AtomicI64::new(expires_at.max(NO_EXPIRY)),
            version: AtomicU64::new(version),
        }
    }

    /// Returns the stored value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the stored value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the absolute expiry in Unix nanoseconds, or [`NO_EXPIRY`].
    pub fn expires_at(&self) -> i64 {
        self.expiry.load(Ordering::Acquire)
    }

    /// Returns the expiry as a timestamp, or `None` when the entry never expires.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        match self.expires_at() {
            NO_EXPIRY => None,
            nanos => Some(DateTime::<Utc>::from_timestamp_nanos(nanos)),
        }
    }

    /// Returns true if the entry's TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_nanos())
    }

    /// Returns true if the entry is expired at the given Unix-nanosecond reading.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at() {
            NO_EXPIRY => false,
            expiry => now > expiry,
        }
    }

    /// Time left before expiry. Zero when expired or when no TTL is set.
    pub fn ttl_remaining(&self) -> Duration {
        match self.expires_at() {
            NO_EXPIRY => Duration::ZERO,
            expiry => {
                let remaining = expiry.saturating_sub(now_nanos());
                if remaining <= 0 {
                    Duration::ZERO
                } else {
                    Duration::from_nanos(remaining as u64)
                }
            }
        }
    }

    /// Replaces the expiry only; value and version are untouched.
    ///
    /// `None` or a zero duration clears the expiration.
    pub fn set_expiry(&self, ttl: Option<Duration>) {
        self.expiry.store(expiry_from_now(ttl), Ordering::Release);
    }

    /// Returns the current version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Increments the version and returns the new value.
    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            expiry: AtomicI64::new(self.expires_at()),
            version: AtomicU64::new(self.version()),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("expires_at", &self.expires_at())
            .field("version", &self.version())
            .finish()
    }
}

/// Current wall-clock time in Unix nanoseconds.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn expiry_from_now(ttl: Option<Duration>) -> i64 {
    match ttl {
        Some(ttl) if !ttl.is_zero() => {
            let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
            now_nanos().saturating_add(ttl)
        }
        _ => NO_EXPIRY,
    }
}
