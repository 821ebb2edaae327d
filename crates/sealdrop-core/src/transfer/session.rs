//! End-to-end session machine.
//!
//! States: `WaitingForReceiver -> KeyGenerated -> FileUploaded ->
//! {Consumed, Expired}`. The receiver generates its ElGamal keypair
//! locally (see [`crate::crypto::elgamal::generate_keypair`]) and
//! discloses only `(p, g, y)`; the private exponent is supplied at
//! decrypt time and never stored server-side. Expiry takes precedence
//! over every guarded transition.

use super::{
    seal_payload, validate_payload, ReleasedFile, SessionRecord, SessionStatus, SessionTicket,
    StatusReport, TransferEngine, TransferId, UploadReceipt, CAS_RETRY_LIMIT, MAX_PIN_ATTEMPTS,
};
use crate::crypto::elgamal::{ElGamalPrivateKey, ElGamalPublicKey};
use crate::error::{Error, Result};
use crate::logging::RedactedHex;
use crate::storage::TransferStore;
use rand::{CryptoRng, RngCore};
use tracing::{info, warn};

impl<S: TransferStore> TransferEngine<S> {
    /// Open a session on behalf of `sender`. No key material exists yet;
    /// the returned ticket is what the receiver uses to join.
    pub fn create_session(
        &self,
        rng: &mut (impl RngCore + CryptoRng),
        sender: &str,
        ttl_secs: i64,
    ) -> Result<SessionTicket> {
        if sender.trim().is_empty() {
            return Err(Error::Validation("sender label is empty".into()));
        }
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + ttl_secs;
        let id = TransferId::generate(rng);

        let record = SessionRecord {
            id,
            version: 0,
            status: SessionStatus::WaitingForReceiver,
            sender: sender.to_string(),
            key_p: Vec::new(),
            key_g: Vec::new(),
            key_y: Vec::new(),
            ciphertext: Vec::new(),
            encrypted_key: Vec::new(),
            digest: None,
            file_name: None,
            tree: Vec::new(),
            original_size: 0,
            compressed_size: 0,
            attempt_count: 0,
            expires_at,
            created_at: now,
            receiver_joined_at: None,
            key_generated_at: None,
            file_uploaded_at: None,
            accessed_at: None,
        };
        self.store().create_session(&record)?;

        let id_hex = id.to_hex();
        info!(id = %RedactedHex(&id_hex), "session created");
        Ok(SessionTicket {
            join_token: id_hex.clone(),
            id: id_hex,
            expires_at,
        })
    }

    /// Record that the receiver joined. Permitted only while waiting for
    /// the receiver; the status itself does not change, since no key
    /// material exists yet.
    pub fn join_session(&self, id: &TransferId) -> Result<()> {
        self.transition_session(id, |record, now| {
            if record.status != SessionStatus::WaitingForReceiver {
                return Err(Error::SessionState("session is not accepting a receiver".into()));
            }
            if record.receiver_joined_at.is_some() {
                return Err(Error::SessionState("receiver already joined".into()));
            }
            record.receiver_joined_at = Some(now);
            Ok(())
        })
    }

    /// Publish the receiver's public key triple `(p, g, y)` and move to
    /// `KeyGenerated`. The private exponent stays with the receiver.
    pub fn publish_session_key(&self, id: &TransferId, public: &ElGamalPublicKey) -> Result<()> {
        let (p, g, y) = public.components();
        self.transition_session(id, move |record, now| {
            if record.status != SessionStatus::WaitingForReceiver {
                return Err(Error::SessionState("key already published".into()));
            }
            record.key_p = p.clone();
            record.key_g = g.clone();
            record.key_y = y.clone();
            record.status = SessionStatus::KeyGenerated;
            record.key_generated_at = Some(now);
            Ok(())
        })?;
        info!(id = %RedactedHex(&id.to_hex()), "session key published");
        Ok(())
    }

    /// Upload the sender's file into a keyed session.
    ///
    /// Fails with [`Error::SessionState`] unless the session is exactly in
    /// `KeyGenerated`. Encryption is keyed to the published public key;
    /// the server ends up with nothing it can decrypt.
    pub fn upload_session_file(
        &self,
        rng: &mut (impl RngCore + CryptoRng),
        id: &TransferId,
        file_name: &str,
        payload: &[u8],
    ) -> Result<UploadReceipt> {
        validate_payload(file_name, payload)?;

        for _ in 0..CAS_RETRY_LIMIT {
            let mut record = self.store().get_session(id)?.ok_or(Error::NotFound)?;
            let observed_version = record.version;
            let now = chrono::Utc::now().timestamp();

            if now >= record.expires_at {
                self.expire_session(record)?;
                return Err(Error::Expired);
            }
            match record.status {
                SessionStatus::KeyGenerated => {}
                SessionStatus::WaitingForReceiver => {
                    return Err(Error::SessionState("receiver has not published a key".into()))
                }
                SessionStatus::FileUploaded => {
                    return Err(Error::SessionState("file already uploaded".into()))
                }
                SessionStatus::Consumed => return Err(Error::Consumed),
                SessionStatus::Expired => return Err(Error::Expired),
            }

            let public =
                ElGamalPublicKey::from_components(&record.key_p, &record.key_g, &record.key_y)?;
            let sealed = seal_payload(rng, &public, payload)?;

            record.ciphertext = sealed.ciphertext;
            record.encrypted_key = sealed.encrypted_key;
            record.tree = sealed.tree;
            record.digest = Some(sealed.digest);
            record.file_name = Some(file_name.to_string());
            record.original_size = sealed.stats.original_size;
            record.compressed_size = sealed.stats.compressed_size;
            record.status = SessionStatus::FileUploaded;
            record.file_uploaded_at = Some(now);

            if !self
                .store()
                .compare_and_update_session(observed_version, &record)?
            {
                continue;
            }
            info!(
                id = %RedactedHex(&id.to_hex()),
                size = payload.len(),
                "session file uploaded"
            );
            return Ok(UploadReceipt {
                stats: sealed.stats,
                uploaded_at: now,
            });
        }
        Err(Error::Storage("record contention retry limit reached".into()))
    }

    /// Decrypt an uploaded session file with the receiver's private
    /// exponent.
    ///
    /// The exponent arrives from the caller and is used transiently; it is
    /// never persisted. Success consumes the session and purges the
    /// payload. A digest mismatch leaves the session untouched; any other
    /// pipeline failure is counted as a failed attempt (audit only -
    /// sessions never lock).
    pub fn decrypt_session(&self, id: &TransferId, exponent: &[u8]) -> Result<ReleasedFile> {
        for _ in 0..CAS_RETRY_LIMIT {
            let mut record = self.store().get_session(id)?.ok_or(Error::NotFound)?;
            let observed_version = record.version;
            let now = chrono::Utc::now().timestamp();

            if now >= record.expires_at {
                self.expire_session(record)?;
                return Err(Error::Expired);
            }
            match record.status {
                SessionStatus::FileUploaded => {}
                SessionStatus::WaitingForReceiver | SessionStatus::KeyGenerated => {
                    return Err(Error::SessionState("no file uploaded yet".into()))
                }
                SessionStatus::Consumed => return Err(Error::Consumed),
                SessionStatus::Expired => return Err(Error::Expired),
            }

            let digest = record
                .digest
                .ok_or_else(|| Error::Storage("uploaded session lacks a digest".into()))?;
            let private = ElGamalPrivateKey::from_exponent_bytes(&record.key_p, exponent)?;
            let opened = super::open_payload(
                &private,
                &record.ciphertext,
                &record.encrypted_key,
                &record.tree,
                record.original_size,
                &digest,
            );

            let plaintext = match opened {
                Ok(plaintext) => plaintext,
                // A digest mismatch leaves the record untouched so a
                // retry through an uncorrupted path stays possible.
                Err(Error::IntegrityMismatch) => return Err(Error::IntegrityMismatch),
                Err(e) => {
                    record.attempt_count = record.attempt_count.saturating_add(1);
                    record.accessed_at = Some(now);
                    if !self
                        .store()
                        .compare_and_update_session(observed_version, &record)?
                    {
                        continue;
                    }
                    warn!(
                        id = %RedactedHex(&id.to_hex()),
                        attempts = record.attempt_count,
                        "session decrypt failed"
                    );
                    return Err(e);
                }
            };

            let file_name = record
                .file_name
                .clone()
                .ok_or_else(|| Error::Storage("uploaded session lacks a file name".into()))?;
            record.status = SessionStatus::Consumed;
            record.purge();
            record.accessed_at = Some(now);
            if !self
                .store()
                .compare_and_update_session(observed_version, &record)?
            {
                // Another decrypt won the race; never release twice.
                continue;
            }

            info!(id = %RedactedHex(&id.to_hex()), "session consumed");
            return Ok(ReleasedFile {
                file_name,
                bytes: plaintext,
            });
        }
        Err(Error::Storage("record contention retry limit reached".into()))
    }

    /// Read-only status view of a session.
    pub fn session_status(&self, id: &TransferId) -> Result<StatusReport> {
        let record = self.store().get_session(id)?.ok_or(Error::NotFound)?;
        let now = chrono::Utc::now().timestamp();
        let status = if now >= record.expires_at && !record.status.is_terminal() {
            SessionStatus::Expired
        } else {
            record.status
        };
        Ok(StatusReport {
            status: status.as_str().to_string(),
            attempts_remaining: MAX_PIN_ATTEMPTS.saturating_sub(record.attempt_count),
            expires_in_secs: (record.expires_at - now).max(0),
        })
    }

    /// Apply a guarded mutation to a session through the CAS cycle.
    /// Expiry is checked before the transition on every pass.
    fn transition_session(
        &self,
        id: &TransferId,
        transition: impl Fn(&mut SessionRecord, i64) -> Result<()>,
    ) -> Result<()> {
        for _ in 0..CAS_RETRY_LIMIT {
            let mut record = self.store().get_session(id)?.ok_or(Error::NotFound)?;
            let observed_version = record.version;
            let now = chrono::Utc::now().timestamp();

            if now >= record.expires_at {
                self.expire_session(record)?;
                return Err(Error::Expired);
            }

            transition(&mut record, now)?;
            if self
                .store()
                .compare_and_update_session(observed_version, &record)?
            {
                return Ok(());
            }
        }
        Err(Error::Storage("record contention retry limit reached".into()))
    }

    /// Persist the lazy expiry transition and purge the payload. Terminal
    /// states are left as they are; a lost race is fine, since whoever won
    /// observed expiry too.
    fn expire_session(&self, mut record: SessionRecord) -> Result<()> {
        if record.status.is_terminal() {
            return Ok(());
        }
        let observed_version = record.version;
        record.status = SessionStatus::Expired;
        record.purge();
        let _ = self
            .store()
            .compare_and_update_session(observed_version, &record)?;
        Ok(())
    }
}
