//! Error types for memento.
//!
//! This module provides the error hierarchy using `thiserror`.
//! `MemoError` is `Clone`: a single computation outcome is broadcast to every
//! caller that waited on it, so errors are shared rather than moved.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using `MemoError`.
pub type Result<T> = std::result::Result<T, MemoError>;

/// Boxed error accepted from user computations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Main error type for all memento operations.
#[derive(Clone, Debug, Error)]
pub enum MemoError {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// No storage backend was supplied.
    #[error("backend cannot be nil")]
    MissingBackend,

    /// TTL must be strictly positive.
    #[error("TTL must be positive, got {0:?}")]
    InvalidTtl(Duration),

    /// Generic configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // REGISTRY ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A backend name must be non-empty.
    #[error("Invalid backend name: {0:?}")]
    InvalidBackendName(String),

    /// A backend factory with this name already exists.
    #[error("Backend factory already registered: {0}")]
    BackendAlreadyRegistered(String),

    /// No backend factory is registered under this name.
    #[error("Unknown backend type: {0}")]
    UnknownBackend(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPUTATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The wrapped computation returned an error. Displayed verbatim.
    #[error("{0}")]
    Computation(Arc<dyn StdError + Send + Sync + 'static>),

    /// The computation task ended without producing a result (panic or abort).
    #[error("Computation aborted: {0}")]
    ComputationAborted(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // CANCELLATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The caller's wait was cancelled before the computation finished.
    #[error("Operation cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Backend I/O failure.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Encoding or decoding a stored entry failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl MemoError {
    /// Wraps an error returned by a user computation.
    pub fn computation(err: impl Into<BoxError>) -> Self {
        MemoError::Computation(Arc::from(err.into()))
    }

    /// Returns the error produced by the computation, if this is one.
    pub fn computation_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            MemoError::Computation(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Downcasts the computation error to a concrete type.
    pub fn downcast_computation<E: StdError + 'static>(&self) -> Option<&E> {
        self.computation_error().and_then(|err| err.downcast_ref::<E>())
    }

    /// Returns true if this error was raised while building a memoizer or registry.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MemoError::MissingBackend
                | MemoError::InvalidTtl(_)
                | MemoError::ConfigError(_)
                | MemoError::InvalidBackendName(_)
                | MemoError::BackendAlreadyRegistered(_)
                | MemoError::UnknownBackend(_)
        )
    }

    /// Returns true if the caller's wait was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MemoError::Cancelled)
    }

    /// Returns true if the error came out of the memoized computation.
    pub fn is_computation_error(&self) -> bool {
        matches!(
            self,
            MemoError::Computation(_) | MemoError::ComputationAborted(_)
        )
    }
}

impl From<std::io::Error> for MemoError {
    fn from(err: std::io::Error) -> Self {
        MemoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for MemoError {
    fn from(err: serde_json::Error) -> Self {
        MemoError::SerializationError(err.to_string())
    }
}
