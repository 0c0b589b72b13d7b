//! # Memento Backends
//!
//! Storage backends for the memento memoization engine.
//!
//! This crate provides:
//!
//! - **Memory**: The reference in-process backend with a background expiry sweep
//! - **File**: One JSON file per key, for caches shared across short-lived processes
//! - **Registry**: Named backend factories so backends can be selected by configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use memento_backends::{BackendOptions, BackendRegistry, MEMORY_BACKEND};
//!
//! // Registry with the in-memory backend pre-registered
//! let registry = BackendRegistry::<String>::with_defaults();
//!
//! // Create a backend by name, sweeping every minute
//! let options = BackendOptions { cleanup_interval: Duration::from_secs(60) };
//! let backend = registry.create_with(MEMORY_BACKEND, &options)?;
//! backend.set("greeting", "hello".into(), Some(Duration::from_secs(30))).await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod file;
mod listeners;
mod memory;
mod registry;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use registry::{BackendFactory, BackendOptions, BackendRegistry};

// Re-export the contract and backend names from core
pub use memento_core::constants::{FILE_BACKEND, MEMORY_BACKEND};
pub use memento_core::traits::{CacheBackend as Backend, EvictionListener, ListenerId};
