//! PIN minting and verification.
//!
//! PINs are short uppercase-alphanumeric codes handed to the sender out of
//! band. Only the SHA-256 hex of a PIN is ever persisted, and comparisons
//! run in constant time.

use crate::crypto;
use rand::{CryptoRng, Rng, RngCore};

/// PIN length in characters.
pub const PIN_LENGTH: usize = 6;

/// Alphabet for minted PINs.
const PIN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Mint a fresh PIN from the supplied CSPRNG.
pub fn generate_pin(rng: &mut (impl RngCore + CryptoRng)) -> String {
    (0..PIN_LENGTH)
        .map(|_| {
            let index = rng.gen_range(0..PIN_CHARSET.len());
            PIN_CHARSET[index] as char
        })
        .collect()
}

/// Hash a PIN for storage.
pub fn hash_pin(pin: &str) -> String {
    crypto::digest::digest_hex(pin.as_bytes())
}

/// Compare a PIN attempt against a stored hash, in constant time.
pub fn verify_pin(attempt: &str, hashed: &str) -> bool {
    crypto::constant_time_eq(hash_pin(attempt).as_bytes(), hashed.as_bytes())
}
