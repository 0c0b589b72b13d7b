//! Domain types for memento.
//!
//! - [`CacheEntry`]: A stored value with expiry and version metadata
//! - [`BackendStats`]: Point-in-time occupancy of a storage backend

mod entry;
mod stats;

pub use entry::*;
pub use stats::*;
