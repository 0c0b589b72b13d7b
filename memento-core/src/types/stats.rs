//! Backend occupancy statistics.

use serde::{Deserialize, Serialize};

/// Point-in-time occupancy of a storage backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    /// Total entries (including expired ones not yet reaped)
    pub total_entries: usize,
    /// Expired entries still held
    pub expired_entries: usize,
    /// Valid (non-expired) entries
    pub valid_entries: usize,
}

impl BackendStats {
    /// Builds stats from a total and an expired count.
    pub fn new(total_entries: usize, expired_entries: usize) -> Self {
        Self {
            total_entries,
            expired_entries,
            valid_entries: total_entries.saturating_sub(expired_entries),
        }
    }
}
