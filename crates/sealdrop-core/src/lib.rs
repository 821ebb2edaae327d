//! # Sealdrop Core Library
//!
//! A cryptographic transfer engine that lets a sender hand a file to a
//! receiver who has no shared account, in one of two modes:
//!
//! - **Legacy mode**: the server compresses, encrypts and stores the file
//!   together with the decryption key material, gated behind a one-time PIN
//!   with attempt limiting and expiry.
//! - **Session mode**: the receiver generates an ElGamal keypair locally and
//!   discloses only the public half; the server never holds anything that
//!   can decrypt the upload.
//!
//! ## Core Guarantees
//!
//! - Fresh key material per transfer (forward secrecy)
//! - One-time consumption: a successful decrypt purges the payload
//! - No more than three PIN mismatches before permanent lockout
//! - Expiry wins over every other access outcome
//! - Integrity verified over the original plaintext, end to end
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       presentation (external)           │
//! ├─────────────────────────────────────────┤
//! │     transfer (state machines)           │
//! ├──────────────────────┬──────────────────┤
//! │  compress │  crypto  │     storage      │
//! └──────────────────────┴──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod compress;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod storage;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum accepted payload size in bytes (32 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;
