//! Symmetric encryption using AES-256-CBC with PKCS#7 padding.
//!
//! The compressed payload is encrypted under a random per-transfer key with
//! a fresh IV per call. The key itself never touches storage in clear; it
//! travels ElGamal-encrypted (see [`crate::crypto::elgamal`]).

use crate::error::{Error, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Block and IV size in bytes.
pub const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A 256-bit symmetric key.
///
/// Zeroized on drop to keep key material from persisting in memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Draw a fresh random key.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Reconstruct a key from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Validation("key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes secret key material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Output format: `iv (16 bytes) || ciphertext`.
pub fn encrypt(
    rng: &mut (impl RngCore + CryptoRng),
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Vec<u8> {
    let mut iv = [0u8; BLOCK_SIZE];
    rng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt data produced by [`encrypt`].
///
/// Expects `iv (16 bytes) || ciphertext`. Structural problems - truncated
/// input, a partial block, invalid padding - fail with
/// [`Error::Decryption`]; garbage is never returned silently.
pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < BLOCK_SIZE * 2 {
        return Err(Error::Decryption("ciphertext too short".into()));
    }
    let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decryption("partial ciphertext block".into()));
    }
    let iv: [u8; BLOCK_SIZE] = iv
        .try_into()
        .map_err(|_| Error::Decryption("invalid iv".into()))?;

    let plaintext = Aes256CbcDec::new(key.as_bytes().into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Decryption("invalid padding".into()))?;

    Ok(Zeroizing::new(plaintext))
}
