//! Transfer records, statuses, and the access-control state machines.
//!
//! Two record kinds exist, one per mode. Both are created on the
//! initiating call, mutated only through the guarded transitions of
//! [`TransferEngine`], and purged once they reach a terminal state.
//! Illegal states are unrepresentable outside the machines: fields are
//! only written through the engine's read-transition-commit cycle.

mod legacy;
mod pin;
mod session;

pub use pin::{generate_pin, hash_pin, verify_pin, PIN_LENGTH};

use crate::compress::{self, Bitstream, CompressionStats, HuffmanTree};
use crate::crypto::{self, ElGamalPrivateKey, ElGamalPublicKey, KeyCiphertext, SymmetricKey};
use crate::error::{Error, Result};
use crate::storage::TransferStore;
use crate::MAX_PAYLOAD_SIZE;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Maximum PIN mismatches tolerated before permanent lockout.
pub const MAX_PIN_ATTEMPTS: u8 = 3;

/// Default record lifetime in seconds (5 minutes).
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

/// Commit retries before a contended record is reported as a storage
/// failure.
const CAS_RETRY_LIMIT: u32 = 16;

/// Opaque unique token identifying a transfer or session.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId([u8; 16]);

impl TransferId {
    /// Mint a fresh random id.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self(crypto::random_bytes(rng))
    }

    /// Parse from the hex form handed to callers.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::Validation("malformed id".into()))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::Validation("malformed id".into()))?;
        Ok(Self(bytes))
    }

    /// Hex form handed to callers.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw bytes (storage key).
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Rebuild from raw storage bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show the first 4 bytes; the full id is a capability.
        write!(f, "TransferId({}...)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Status of a PIN-gated transfer.
///
/// `Active` is the only non-terminal state; once a record leaves it, it
/// never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyStatus {
    /// Awaiting a successful access.
    Active,
    /// Locked out after too many PIN mismatches.
    Locked,
    /// Past its expiry timestamp.
    Expired,
    /// Released exactly once; payload purged.
    Consumed,
}

impl LegacyStatus {
    /// Storage string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyStatus::Active => "active",
            LegacyStatus::Locked => "locked",
            LegacyStatus::Expired => "expired",
            LegacyStatus::Consumed => "consumed",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(LegacyStatus::Active),
            "locked" => Ok(LegacyStatus::Locked),
            "expired" => Ok(LegacyStatus::Expired),
            "consumed" => Ok(LegacyStatus::Consumed),
            other => Err(Error::Storage(format!("unknown legacy status: {other}"))),
        }
    }

    /// True for every state except `Active`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegacyStatus::Active)
    }
}

/// Status of an end-to-end session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Created; no receiver key material yet.
    WaitingForReceiver,
    /// Receiver published its public key triple.
    KeyGenerated,
    /// Sender uploaded the encrypted payload.
    FileUploaded,
    /// Decrypted exactly once; payload purged.
    Consumed,
    /// Past its expiry timestamp.
    Expired,
}

impl SessionStatus {
    /// Storage string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::WaitingForReceiver => "waiting",
            SessionStatus::KeyGenerated => "keyed",
            SessionStatus::FileUploaded => "uploaded",
            SessionStatus::Consumed => "consumed",
            SessionStatus::Expired => "expired",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(SessionStatus::WaitingForReceiver),
            "keyed" => Ok(SessionStatus::KeyGenerated),
            "uploaded" => Ok(SessionStatus::FileUploaded),
            "consumed" => Ok(SessionStatus::Consumed),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(Error::Storage(format!("unknown session status: {other}"))),
        }
    }

    /// True once the session can never progress again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Consumed | SessionStatus::Expired)
    }
}

/// A PIN-gated transfer row as persisted through the gateway.
#[derive(Debug, Clone)]
pub struct LegacyRecord {
    /// Opaque unique token.
    pub id: TransferId,
    /// Optimistic-concurrency version, bumped on every committed update.
    pub version: u64,
    /// Current machine state.
    pub status: LegacyStatus,
    /// AES ciphertext (`iv || ct`) over the packed bitstream.
    pub ciphertext: Vec<u8>,
    /// ElGamal-encrypted symmetric key blob.
    pub encrypted_key: Vec<u8>,
    /// Server-held private key modulus, big-endian.
    pub private_key_p: Vec<u8>,
    /// Server-held private exponent, big-endian.
    pub private_key_x: Vec<u8>,
    /// SHA-256 of the original uncompressed plaintext.
    pub digest: [u8; 32],
    /// SHA-256 hex of the minted PIN.
    pub hashed_pin: String,
    /// PIN mismatches so far; never exceeds [`MAX_PIN_ATTEMPTS`].
    pub attempt_count: u8,
    /// Expiry timestamp (epoch seconds), immutable after creation.
    pub expires_at: i64,
    /// Original filename.
    pub file_name: String,
    /// Serialized Huffman tree.
    pub tree: Vec<u8>,
    /// Plaintext size in bytes.
    pub original_size: u64,
    /// Packed bitstream size in bytes.
    pub compressed_size: u64,
    /// Optional intended-receiver label (audit only, never a gate).
    pub intended_receiver: Option<String>,
    /// Receiver label supplied at access time (audit only).
    pub actual_receiver: Option<String>,
    /// Last access attempt timestamp.
    pub accessed_at: Option<i64>,
    /// Creation timestamp.
    pub created_at: i64,
}

impl LegacyRecord {
    /// Overwrite every sensitive field. Called in the same committed
    /// update that moves the record to a terminal state.
    fn purge(&mut self) {
        self.ciphertext = Vec::new();
        self.encrypted_key = Vec::new();
        self.private_key_p = Vec::new();
        self.private_key_x = Vec::new();
        self.tree = Vec::new();
    }
}

/// An end-to-end session row as persisted through the gateway.
///
/// The private exponent never appears here - it exists only on the
/// receiver's side.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Opaque unique token; doubles as the join token.
    pub id: TransferId,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Current machine state.
    pub status: SessionStatus,
    /// Sender label.
    pub sender: String,
    /// Public key modulus, big-endian; empty until the key is published.
    pub key_p: Vec<u8>,
    /// Public key generator, big-endian.
    pub key_g: Vec<u8>,
    /// Public value `y = g^x mod p`, big-endian.
    pub key_y: Vec<u8>,
    /// AES ciphertext; empty until upload.
    pub ciphertext: Vec<u8>,
    /// ElGamal-encrypted symmetric key blob; empty until upload.
    pub encrypted_key: Vec<u8>,
    /// SHA-256 of the original plaintext; absent until upload.
    pub digest: Option<[u8; 32]>,
    /// Original filename; absent until upload.
    pub file_name: Option<String>,
    /// Serialized Huffman tree; empty until upload.
    pub tree: Vec<u8>,
    /// Plaintext size in bytes.
    pub original_size: u64,
    /// Packed bitstream size in bytes.
    pub compressed_size: u64,
    /// Failed decrypt attempts (audit only; sessions never lock).
    pub attempt_count: u8,
    /// Expiry timestamp (epoch seconds), immutable after creation.
    pub expires_at: i64,
    /// Creation timestamp.
    pub created_at: i64,
    /// When the receiver joined.
    pub receiver_joined_at: Option<i64>,
    /// When the public key was published.
    pub key_generated_at: Option<i64>,
    /// When the payload was uploaded.
    pub file_uploaded_at: Option<i64>,
    /// Last decrypt attempt timestamp.
    pub accessed_at: Option<i64>,
}

impl SessionRecord {
    fn purge(&mut self) {
        self.ciphertext = Vec::new();
        self.encrypted_key = Vec::new();
        self.tree = Vec::new();
        self.key_p = Vec::new();
        self.key_g = Vec::new();
        self.key_y = Vec::new();
    }
}

/// Returned to the sender when a PIN-gated transfer is created.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyTicket {
    /// Transfer id, hex.
    pub id: String,
    /// Minted one-time PIN. Shown to the sender once, stored only hashed.
    pub pin: String,
    /// Expiry timestamp (epoch seconds).
    pub expires_at: i64,
    /// Compression outcome.
    pub stats: CompressionStats,
}

/// Returned when an end-to-end session is opened.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTicket {
    /// Session id, hex.
    pub id: String,
    /// Token the receiver presents to join; the id itself in this design.
    pub join_token: String,
    /// Expiry timestamp (epoch seconds).
    pub expires_at: i64,
}

/// Returned to the uploading sender in session mode.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    /// Compression outcome.
    pub stats: CompressionStats,
    /// Upload timestamp (epoch seconds).
    pub uploaded_at: i64,
}

/// A decrypted payload released to the receiver.
///
/// The byte container zeroizes on drop.
pub struct ReleasedFile {
    /// Original filename.
    pub file_name: String,
    /// Decrypted plaintext.
    pub bytes: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ReleasedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasedFile")
            .field("file_name", &self.file_name)
            .field("bytes", &crate::logging::RedactedBytes(&self.bytes))
            .finish()
    }
}

/// Status-check view of a record.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Current status string.
    pub status: String,
    /// Attempts left before lockout (always reported for sessions, which
    /// never lock).
    pub attempts_remaining: u8,
    /// Seconds until expiry; zero once past it.
    pub expires_in_secs: i64,
}

/// The transfer engine: both state machines over a persistence gateway.
///
/// All crypto runs synchronously and touches no shared mutable state;
/// the store is the only suspension point. A record mutates only at the
/// commit step, so an abandoned call leaves it untouched.
pub struct TransferEngine<S: TransferStore> {
    store: S,
}

impl<S: TransferStore> TransferEngine<S> {
    /// Create an engine over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reap rows past expiry or already terminal. Optional: correctness
    /// never depends on it, since expiry is checked lazily at access time.
    pub fn sweep_expired(&self) -> Result<usize> {
        let swept = self.store.sweep(chrono::Utc::now().timestamp())?;
        if swept > 0 {
            tracing::debug!(count = swept, "swept expired records");
        }
        Ok(swept)
    }
}

/// Reject bad input shape before any crypto runs.
fn validate_payload(file_name: &str, payload: &[u8]) -> Result<()> {
    if file_name.trim().is_empty() {
        return Err(Error::Validation("file name is empty".into()));
    }
    if payload.is_empty() {
        return Err(Error::Validation("payload is empty".into()));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::Validation("payload exceeds size limit".into()));
    }
    Ok(())
}

/// Everything the encrypt pipeline produces for persistence.
struct SealedPayload {
    ciphertext: Vec<u8>,
    encrypted_key: Vec<u8>,
    tree: Vec<u8>,
    digest: [u8; 32],
    stats: CompressionStats,
}

/// Run the full sender pipeline: digest, compress, AES-encrypt under a
/// fresh key, ElGamal-encrypt that key to `public`.
fn seal_payload(
    rng: &mut (impl RngCore + CryptoRng),
    public: &ElGamalPublicKey,
    payload: &[u8],
) -> Result<SealedPayload> {
    let digest = crypto::digest::digest(payload);
    let (tree, bits) = compress::encode(payload)?;
    let stats = CompressionStats {
        original_size: payload.len() as u64,
        compressed_size: bits.byte_len() as u64,
    };

    let key = SymmetricKey::generate(rng);
    let ciphertext = crypto::cipher::encrypt(rng, &key, &bits.to_bytes()?);
    let encrypted_key = crypto::elgamal::encrypt(rng, public, key.as_bytes())?.to_bytes()?;

    Ok(SealedPayload {
        ciphertext,
        encrypted_key,
        tree: tree.to_bytes()?,
        digest,
        stats,
    })
}

/// Run the full receiver pipeline: recover the symmetric key, AES-decrypt,
/// Huffman-decode, verify the digest over the recovered plaintext.
///
/// Fails with [`Error::IntegrityMismatch`] as the last step when the
/// digest disagrees; every earlier failure keeps its own error kind.
fn open_payload(
    private: &ElGamalPrivateKey,
    ciphertext: &[u8],
    encrypted_key: &[u8],
    tree_blob: &[u8],
    original_size: u64,
    expected_digest: &[u8; 32],
) -> Result<Zeroizing<Vec<u8>>> {
    let key_ciphertext = KeyCiphertext::from_bytes(encrypted_key)?;
    let key_bytes = crypto::elgamal::decrypt(private, &key_ciphertext)?;
    let key = SymmetricKey::from_bytes(&key_bytes)
        .map_err(|_| Error::Decryption("recovered key is malformed".into()))?;

    let bits_blob = crypto::cipher::decrypt(&key, ciphertext)?;
    let bits = Bitstream::from_bytes(&bits_blob)?;
    let tree = HuffmanTree::from_bytes(tree_blob)?;
    let plaintext = compress::decode(&tree, &bits, original_size as usize)?;

    if !crypto::digest::verify(&plaintext, expected_digest) {
        return Err(Error::IntegrityMismatch);
    }
    Ok(Zeroizing::new(plaintext))
}
