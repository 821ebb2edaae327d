//! PIN-gated transfer machine (legacy mode).
//!
//! States: `Active -> {Locked, Expired, Consumed}`, all terminal. Every
//! access attempt evaluates in fixed order: expiry, terminal status, PIN,
//! decrypt pipeline. Expiry wins regardless of PIN correctness or
//! remaining attempts.
//!
//! The server generates and holds the keypair in this mode; the PIN is the
//! only credential the receiver needs.

use super::{
    pin, seal_payload, validate_payload, LegacyRecord, LegacyStatus, LegacyTicket, ReleasedFile,
    StatusReport, TransferEngine, TransferId, CAS_RETRY_LIMIT, MAX_PIN_ATTEMPTS,
};
use crate::crypto::elgamal::{self, DEFAULT_PRIME_BITS};
use crate::error::{Error, Result};
use crate::logging::RedactedHex;
use crate::storage::TransferStore;
use rand::{CryptoRng, RngCore};
use tracing::{info, warn};

impl<S: TransferStore> TransferEngine<S> {
    /// Create a PIN-gated transfer.
    ///
    /// Runs the whole sender pipeline - digest, compress, AES-encrypt,
    /// ElGamal-encrypt the key to a server-generated keypair - then
    /// persists the record and mints the PIN. `ttl_secs` fixes the expiry
    /// timestamp, which is immutable afterwards.
    pub fn initiate_legacy(
        &self,
        rng: &mut (impl RngCore + CryptoRng),
        file_name: &str,
        payload: &[u8],
        ttl_secs: i64,
        intended_receiver: Option<&str>,
    ) -> Result<LegacyTicket> {
        validate_payload(file_name, payload)?;
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + ttl_secs;

        let (public, private) = elgamal::generate_keypair(rng, DEFAULT_PRIME_BITS)?;
        let sealed = seal_payload(rng, &public, payload)?;

        let pin = pin::generate_pin(rng);
        let id = TransferId::generate(rng);
        let record = LegacyRecord {
            id,
            version: 0,
            status: LegacyStatus::Active,
            ciphertext: sealed.ciphertext,
            encrypted_key: sealed.encrypted_key,
            private_key_p: private.p.to_bytes_be(),
            private_key_x: private.exponent_bytes().to_vec(),
            digest: sealed.digest,
            hashed_pin: pin::hash_pin(&pin),
            attempt_count: 0,
            expires_at,
            file_name: file_name.to_string(),
            tree: sealed.tree,
            original_size: sealed.stats.original_size,
            compressed_size: sealed.stats.compressed_size,
            intended_receiver: intended_receiver.map(str::to_string),
            actual_receiver: None,
            accessed_at: None,
            created_at: now,
        };
        self.store().create_legacy(&record)?;

        let id_hex = id.to_hex();
        info!(
            id = %RedactedHex(&id_hex),
            size = payload.len(),
            compressed = sealed.stats.compressed_size,
            "legacy transfer created"
        );
        Ok(LegacyTicket {
            id: id_hex,
            pin,
            expires_at,
            stats: sealed.stats,
        })
    }

    /// Attempt to access a PIN-gated transfer.
    ///
    /// On success the record transitions to `Consumed` and its payload is
    /// purged: the plaintext is released exactly once. A digest mismatch
    /// aborts without consuming the record or counting an attempt.
    /// `receiver` is recorded as an audit label, never enforced.
    pub fn access_legacy(
        &self,
        id: &TransferId,
        pin_attempt: &str,
        receiver: Option<&str>,
    ) -> Result<ReleasedFile> {
        for _ in 0..CAS_RETRY_LIMIT {
            let mut record = self.store().get_legacy(id)?.ok_or(Error::NotFound)?;
            let observed_version = record.version;
            let now = chrono::Utc::now().timestamp();
            let id_hex = id.to_hex();

            // 1. Expiry wins over PIN correctness and remaining attempts.
            if now >= record.expires_at {
                if record.status == LegacyStatus::Active {
                    record.status = LegacyStatus::Expired;
                    record.purge();
                    record.accessed_at = Some(now);
                    if !self
                        .store()
                        .compare_and_update_legacy(observed_version, &record)?
                    {
                        continue;
                    }
                    info!(id = %RedactedHex(&id_hex), "expired transfer accessed");
                }
                return Err(Error::Expired);
            }

            // 2. Terminal states answer immediately, no further mutation.
            match record.status {
                LegacyStatus::Locked => return Err(Error::AttemptsExceeded),
                LegacyStatus::Consumed => return Err(Error::Consumed),
                LegacyStatus::Expired => return Err(Error::Expired),
                LegacyStatus::Active => {}
            }

            // 3. A PIN mismatch is a persisted mutation: the attempt count
            // moves atomically or not at all.
            if !pin::verify_pin(pin_attempt, &record.hashed_pin) {
                record.attempt_count += 1;
                record.accessed_at = Some(now);
                let locked = record.attempt_count >= MAX_PIN_ATTEMPTS;
                if locked {
                    record.status = LegacyStatus::Locked;
                }
                if !self
                    .store()
                    .compare_and_update_legacy(observed_version, &record)?
                {
                    continue;
                }
                if locked {
                    warn!(id = %RedactedHex(&id_hex), "transfer locked after repeated pin mismatches");
                    return Err(Error::AttemptsExceeded);
                }
                warn!(
                    id = %RedactedHex(&id_hex),
                    attempts = record.attempt_count,
                    "pin mismatch"
                );
                return Err(Error::PinMismatch {
                    attempts_remaining: MAX_PIN_ATTEMPTS - record.attempt_count,
                });
            }

            // 4. Decrypt pipeline. Any failure here aborts the call with
            // the persisted state untouched; IntegrityMismatch in
            // particular leaves the record retryable.
            let private = elgamal::ElGamalPrivateKey::from_exponent_bytes(
                &record.private_key_p,
                &record.private_key_x,
            )
            .map_err(|_| Error::Decryption("stored key material is malformed".into()))?;
            let plaintext = super::open_payload(
                &private,
                &record.ciphertext,
                &record.encrypted_key,
                &record.tree,
                record.original_size,
                &record.digest,
            )?;

            let file_name = record.file_name.clone();
            record.status = LegacyStatus::Consumed;
            record.purge();
            record.actual_receiver = receiver.map(str::to_string);
            record.accessed_at = Some(now);
            if !self
                .store()
                .compare_and_update_legacy(observed_version, &record)?
            {
                // Another access won the race; never release twice.
                continue;
            }

            info!(id = %RedactedHex(&id_hex), "transfer consumed");
            return Ok(ReleasedFile {
                file_name,
                bytes: plaintext,
            });
        }
        Err(Error::Storage("record contention retry limit reached".into()))
    }

    /// Read-only status view of a PIN-gated transfer.
    ///
    /// Reports expiry lazily without mutating the record.
    pub fn legacy_status(&self, id: &TransferId) -> Result<StatusReport> {
        let record = self.store().get_legacy(id)?.ok_or(Error::NotFound)?;
        let now = chrono::Utc::now().timestamp();
        let status = if now >= record.expires_at && record.status == LegacyStatus::Active {
            LegacyStatus::Expired
        } else {
            record.status
        };
        Ok(StatusReport {
            status: status.as_str().to_string(),
            attempts_remaining: MAX_PIN_ATTEMPTS.saturating_sub(record.attempt_count),
            expires_in_secs: (record.expires_at - now).max(0),
        })
    }
}
