//! SHA-256 digesting and constant-time verification.
//!
//! The digest is computed over the original uncompressed plaintext when a
//! transfer is created and re-checked after the full decrypt + decompress
//! pipeline at access time. A mismatch anywhere along the pipeline aborts
//! the access without consuming the record.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Digest size in bytes (256 bits).
pub const DIGEST_SIZE: usize = 32;

/// Compute the SHA-256 digest of arbitrary data.
pub fn digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 and return a lowercase hex string.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(digest(data))
}

/// Verify `data` against an expected digest.
///
/// The comparison runs in constant time over the full digest length; it
/// does not exit early on the first mismatched byte.
pub fn verify(data: &[u8], expected: &[u8; DIGEST_SIZE]) -> bool {
    digest(data).as_slice().ct_eq(expected.as_slice()).into()
}
