//! Cache keys for memoized function arguments.
//!
//! Arguments are encoded to canonical JSON before hashing: they are first
//! lowered to a [`serde_json::Value`], whose objects keep their keys sorted,
//! so two maps holding the same entries encode identically regardless of
//! their iteration order.

use std::fmt::Debug;

use serde::Serialize;
use tracing::debug;

use memento_core::constants::{DOMAIN_ARGS_FALLBACK, DOMAIN_ARGS_KEY};
use memento_core::error::Result;

use crate::digest::hash_hex;

/// Hashes the arguments into a deterministic, hex-encoded SHA3-256 key.
///
/// Never fails: if the arguments cannot be encoded (for example a map with
/// non-string keys), the key is derived from their `{:#?}` rendering
/// instead. That fallback is stable for equal values but offers weaker
/// collision resistance.
pub fn hash_args<T>(args: &T) -> String
where
    T: Serialize + Debug + ?Sized,
{
    match try_hash_args(args) {
        Ok(key) => key,
        Err(err) => {
            debug!(error = %err, "Argument encoding failed, using debug-format key");
            fallback_hash(args)
        }
    }
}

/// Hashes the canonical JSON encoding of the arguments.
pub fn try_hash_args<T>(args: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let canonical = serde_json::to_value(args)?;
    let encoded = serde_json::to_vec(&canonical)?;
    Ok(hash_hex(DOMAIN_ARGS_KEY, &encoded))
}

/// Weaker, always-available key derived from the `Debug` rendering.
pub fn fallback_hash<T>(args: &T) -> String
where
    T: Debug + ?Sized,
{
    let rendered = format!("{:#?}", args);
    hash_hex(DOMAIN_ARGS_FALLBACK, rendered.as_bytes())
}
