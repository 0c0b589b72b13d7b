//! Hashing utilities with domain separation.
//!
//! Every digest in memento is SHA3-256 over a length-prefixed domain
//! separator followed by the input:
//!
//! ```text
//! output = SHA3-256(len(domain) || domain || input)
//! ```
//!
//! so argument keys and file names can never collide with each other even
//! when their inputs happen to be byte-identical.

use sha3::{Digest, Sha3_256};

/// Size of a SHA3-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// SHA3-256 FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Computes SHA3-256 with domain separation.
///
/// # Arguments
///
/// * `domain` - Domain separator bytes (unique per use case)
/// * `input` - Input data to hash
///
/// # Example
///
/// ```rust
/// use memento_hash::hash_bytes;
/// use memento_core::constants::DOMAIN_FILE_NAME;
///
/// let digest = hash_bytes(DOMAIN_FILE_NAME, b"user:42");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn hash_bytes(domain: &[u8], input: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha3_256::new();

    hasher.update((domain.len() as u32).to_le_bytes());
    hasher.update(domain);
    hasher.update(input);

    hasher.finalize().into()
}

/// Same as [`hash_bytes`], hex encoded (64 lowercase characters).
pub fn hash_hex(domain: &[u8], input: &[u8]) -> String {
    hex::encode(hash_bytes(domain, input))
}
