//! # Memento Hash
//!
//! Deterministic cache-key derivation for memoized function arguments.
//!
//! This crate provides:
//!
//! - **Digest**: SHA3-256 with domain separation
//! - **Args**: [`hash_args`], a never-failing digest of any serializable argument tuple
//!
//! ## Key Properties
//!
//! - Structurally equal arguments always hash to the same key, including maps,
//!   whose entries are put in canonical order before hashing
//! - Arguments that cannot be encoded fall back to a digest of their `Debug`
//!   rendering, trading collision resistance for availability
//!
//! ## Example
//!
//! ```rust
//! use memento_hash::hash_args;
//!
//! let a = hash_args(&("user", 42));
//! let b = hash_args(&("user", 42));
//! assert_eq!(a, b);
//! assert_ne!(a, hash_args(&("user", 43)));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod args;
pub mod digest;

// Re-export main functions at crate root
pub use args::{fallback_hash, hash_args, try_hash_args};
pub use digest::{hash_bytes, hash_hex};
