//! Error types for sealdrop.
//!
//! All errors are designed to avoid leaking sensitive information.
//! State-machine outcomes reach the caller as structured codes, never as
//! raw internal exceptions or stack traces.

use thiserror::Error;

/// Core error type for sealdrop operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before any crypto ran.
    #[error("invalid input")]
    Validation(String),

    /// Malformed Huffman tree or bitstream on decode.
    #[error("compression error")]
    Compression(String),

    /// Keypair generation failed.
    #[error("key generation failed")]
    KeyGeneration(String),

    /// Encryption failure.
    #[error("encryption failed")]
    Encryption(String),

    /// Decryption failure, including structurally invalid padding.
    #[error("decryption failed")]
    Decryption(String),

    /// Message cannot be represented below the key modulus.
    #[error("message too large for key modulus")]
    Encoding(String),

    /// Digest mismatch after decrypt and decompress. The record is left
    /// untouched so a retry through an uncorrupted path remains possible.
    #[error("integrity check failed")]
    IntegrityMismatch,

    /// Wrong PIN; the record remains active.
    #[error("invalid pin")]
    PinMismatch {
        /// Attempts left before the record locks.
        attempts_remaining: u8,
    },

    /// Record locked after too many invalid attempts.
    #[error("access locked")]
    AttemptsExceeded,

    /// Record expired before access.
    #[error("transfer expired")]
    Expired,

    /// Illegal session state transition.
    #[error("invalid session state")]
    SessionState(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Record already consumed; the payload is released exactly once.
    #[error("already consumed")]
    Consumed,

    /// Storage operation failed.
    #[error("storage error")]
    Storage(String),
}

/// Result type alias using sealdrop's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable code string for the presentation boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_FAILED",
            Error::Compression(_) => "COMPRESSION_FAILED",
            Error::KeyGeneration(_) => "KEY_GENERATION_FAILED",
            Error::Encryption(_) => "ENCRYPTION_FAILED",
            Error::Decryption(_) => "DECRYPTION_FAILED",
            Error::Encoding(_) => "ENCODING_FAILED",
            Error::IntegrityMismatch => "INTEGRITY_MISMATCH",
            Error::PinMismatch { .. } => "PIN_MISMATCH",
            Error::AttemptsExceeded => "ATTEMPTS_EXCEEDED",
            Error::Expired => "EXPIRED",
            Error::SessionState(_) => "SESSION_STATE",
            Error::NotFound => "NOT_FOUND",
            Error::Consumed => "CONSUMED",
            Error::Storage(_) => "STORAGE_FAILED",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
