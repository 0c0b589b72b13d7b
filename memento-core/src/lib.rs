//! # Memento Core
//!
//! Core types, errors, and traits for the memento memoization engine.
//!
//! This crate provides the foundational building blocks used by all other memento crates:
//!
//! - **Types**: The time-bounded [`CacheEntry`] and backend statistics
//! - **Errors**: A single cloneable error type shared by every waiter of a computation
//! - **Constants**: Defaults for TTLs, sweep cadence and key namespacing
//! - **Traits**: The [`CacheBackend`] storage contract
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use memento_core::CacheEntry;
//!
//! let entry = CacheEntry::new("value", Some(Duration::from_secs(30)), 1);
//! assert!(!entry.is_expired());
//! assert_eq!(entry.bump_version(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{BoxError, MemoError, Result};
pub use traits::*;
pub use types::*;
