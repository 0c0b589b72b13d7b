//! # Memento
//!
//! Memoization for async Rust: results are cached by key for a fixed TTL,
//! and concurrent misses on the same key share one computation.
//!
//! - [`Memoizer`] checks the backend, deduplicates misses through
//!   [`SingleFlight`], writes results back and records [`Metrics`].
//! - [`MemoizedFn`] wraps an async function and keys calls by a hash of
//!   their arguments.
//! - Storage is any [`CacheBackend`]; [`MemoryBackend`] and [`FileBackend`]
//!   ship with the crate and can be looked up by name in a
//!   [`BackendRegistry`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use memento::{Memoizer, MemoryBackend};
//!
//! tokio_test::block_on(async {
//!     let memo = Memoizer::builder()
//!         .backend(Arc::new(MemoryBackend::<u64>::without_sweep()))
//!         .ttl(Duration::from_secs(30))
//!         .metrics(true)
//!         .build()
//!         .unwrap();
//!
//!     let value = memo
//!         .get("answer", || async { Ok::<_, std::io::Error>(42) })
//!         .await
//!         .unwrap();
//!     assert_eq!(value, 42);
//!     assert_eq!(memo.metrics().misses(), 1);
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

mod config;
mod memoize_fn;
mod memoizer;
mod metrics;
mod singleflight;

pub use config::{CacheSettings, MemoizerBuilder, MemoizerConfig};
pub use memoize_fn::{KeyFn, MemoizedFn};
pub use memoizer::Memoizer;
pub use metrics::{Metrics, MetricsSnapshot};
pub use singleflight::{CallContext, SingleFlight};

pub use memento_backends::{BackendFactory, BackendOptions, BackendRegistry, FileBackend, MemoryBackend};
pub use memento_core::{BoxError, CacheBackend, CacheEntry, EvictionListener, ListenerId, MemoError, Result};
pub use memento_hash::hash_args;
