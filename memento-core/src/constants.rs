//! Shared constants for memento.
//!
//! Defaults used by the memoizer configuration and the reference backends,
//! plus the domain separators used when deriving digests.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY LIFETIME
// ═══════════════════════════════════════════════════════════════════════════════

/// Expiry sentinel stored in a [`CacheEntry`](crate::CacheEntry) that never expires.
pub const NO_EXPIRY: i64 = 0;

/// Default lifetime of a memoized value (1 hour).
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// First version assigned to a freshly written slot.
pub const INITIAL_VERSION: u64 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKGROUND SWEEP
// ═══════════════════════════════════════════════════════════════════════════════

/// Sweep cadence of the in-memory backend when none is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cleanup cadence advertised by the memoizer configuration (1 hour).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND NAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry name of the in-memory reference backend.
pub const MEMORY_BACKEND: &str = "memory";

/// Registry name of the file-backed backend.
pub const FILE_BACKEND: &str = "file";

/// File extension used by the file backend for stored entries.
pub const FILE_ENTRY_EXTENSION: &str = "json";

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN SEPARATORS
// ═══════════════════════════════════════════════════════════════════════════════
// Digests of different kinds of input never collide, even for equal bytes.

/// Domain separator for memoized-function argument keys.
pub const DOMAIN_ARGS_KEY: &[u8] = b"MEMENTO_ARGS_KEY_V1";

/// Domain separator for the debug-format fallback of argument keys.
pub const DOMAIN_ARGS_FALLBACK: &[u8] = b"MEMENTO_ARGS_FALLBACK_V1";

/// Domain separator for file names derived from cache keys.
pub const DOMAIN_FILE_NAME: &[u8] = b"MEMENTO_FILE_NAME_V1";

/// Separator placed between a memoized-function namespace and its argument digest.
pub const KEY_NAMESPACE_SEPARATOR: char = ':';
