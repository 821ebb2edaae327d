//! Durable persistence gateway for transfer records.
//!
//! The engine never touches rows directly: it reads a record, computes a
//! state transition, and commits through a compare-and-update guarded by
//! the version observed at read time. A failed compare means another
//! writer got there first and the engine retries the whole cycle, so an
//! attempt is never double-counted and a payload is never double-consumed.
//!
//! ## Security
//!
//! - `secure_delete` is enabled so purged blobs are overwritten on disk
//! - No plaintext payload ever reaches storage

mod database;
mod schema;

pub use database::{Database, DatabaseConfig};

use crate::error::Result;
use crate::transfer::{LegacyRecord, SessionRecord, TransferId};

/// Persistence contract consumed by the transfer engine.
///
/// Implementations must make `compare_and_update_*` atomic with respect to
/// concurrent writers: the update applies only when the stored version
/// still equals `expected_version`, and a successful update bumps the
/// stored version by one.
pub trait TransferStore {
    /// Persist a new legacy record.
    fn create_legacy(&self, record: &LegacyRecord) -> Result<()>;

    /// Fetch a legacy record by id.
    fn get_legacy(&self, id: &TransferId) -> Result<Option<LegacyRecord>>;

    /// Commit `record` only if the stored version equals `expected_version`.
    /// Returns `false` on a version conflict.
    fn compare_and_update_legacy(
        &self,
        expected_version: u64,
        record: &LegacyRecord,
    ) -> Result<bool>;

    /// Delete a legacy record.
    fn delete_legacy(&self, id: &TransferId) -> Result<()>;

    /// Persist a new session record.
    fn create_session(&self, record: &SessionRecord) -> Result<()>;

    /// Fetch a session record by id.
    fn get_session(&self, id: &TransferId) -> Result<Option<SessionRecord>>;

    /// Commit `record` only if the stored version equals `expected_version`.
    /// Returns `false` on a version conflict.
    fn compare_and_update_session(
        &self,
        expected_version: u64,
        record: &SessionRecord,
    ) -> Result<bool>;

    /// Delete a session record.
    fn delete_session(&self, id: &TransferId) -> Result<()>;

    /// Delete rows that are past expiry or already terminal, reclaiming
    /// storage. Correctness never depends on this running: expiry is
    /// checked lazily at access time.
    fn sweep(&self, now: i64) -> Result<usize>;
}
