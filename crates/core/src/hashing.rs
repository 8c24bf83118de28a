//! Shared SHA-256 hex digest utility.
//!
//! Artifact identity is the SHA-256 of its bytes; the stores, the worker
//! cache and the fetch verification all go through [`sha256_hex`].

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Return `true` if `hash` looks like a lowercase SHA-256 hex digest.
pub fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
