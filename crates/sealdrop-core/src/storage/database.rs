//! SQLite-backed transfer store.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use super::TransferStore;
use crate::error::{Error, Result};
use crate::transfer::{LegacyRecord, LegacyStatus, SessionRecord, SessionStatus, TransferId};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use an in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sealdrop.db".to_string(),
            in_memory: false,
        }
    }
}

/// Database handle implementing [`TransferStore`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
            }
            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        // secure_delete overwrites purged blobs instead of merely
        // unlinking pages; required for one-time consumption.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = DELETE;
            PRAGMA secure_delete = ON;
            PRAGMA auto_vacuum = FULL;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set security pragmas: {}", e)))?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }
}

fn digest_from_blob(blob: Vec<u8>) -> rusqlite::Result<[u8; 32]> {
    blob.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            32,
            rusqlite::types::Type::Blob,
            "digest must be 32 bytes".into(),
        )
    })
}

fn id_from_blob(blob: Vec<u8>) -> rusqlite::Result<TransferId> {
    let bytes: [u8; 16] = blob.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            16,
            rusqlite::types::Type::Blob,
            "id must be 16 bytes".into(),
        )
    })?;
    Ok(TransferId::from_bytes(bytes))
}

impl TransferStore for Database {
    fn create_legacy(&self, record: &LegacyRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO legacy_transfers
                (id, version, status, ciphertext, encrypted_key, private_key_p,
                 private_key_x, digest, hashed_pin, attempt_count, expires_at,
                 file_name, huffman_tree, original_size, compressed_size,
                 intended_receiver, actual_receiver, accessed_at, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    record.id.as_bytes().as_slice(),
                    record.version as i64,
                    record.status.as_str(),
                    record.ciphertext,
                    record.encrypted_key,
                    record.private_key_p,
                    record.private_key_x,
                    record.digest.as_slice(),
                    record.hashed_pin,
                    record.attempt_count as i64,
                    record.expires_at,
                    record.file_name,
                    record.tree,
                    record.original_size as i64,
                    record.compressed_size as i64,
                    record.intended_receiver,
                    record.actual_receiver,
                    record.accessed_at,
                    record.created_at,
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to store transfer: {}", e)))?;
        Ok(())
    }

    fn get_legacy(&self, id: &TransferId) -> Result<Option<LegacyRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, version, status, ciphertext, encrypted_key,
                       private_key_p, private_key_x, digest, hashed_pin,
                       attempt_count, expires_at, file_name, huffman_tree,
                       original_size, compressed_size, intended_receiver,
                       actual_receiver, accessed_at, created_at
                FROM legacy_transfers WHERE id = ?
                "#,
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = stmt.query_row(params![id.as_bytes().as_slice()], |row| {
            let id = id_from_blob(row.get(0)?)?;
            let version: i64 = row.get(1)?;
            let status: String = row.get(2)?;
            let digest = digest_from_blob(row.get(7)?)?;
            let attempt_count: i64 = row.get(9)?;
            let original_size: i64 = row.get(13)?;
            let compressed_size: i64 = row.get(14)?;
            Ok(LegacyRecord {
                id,
                version: version as u64,
                status: LegacyStatus::Active, // replaced below
                ciphertext: row.get(3)?,
                encrypted_key: row.get(4)?,
                private_key_p: row.get(5)?,
                private_key_x: row.get(6)?,
                digest,
                hashed_pin: row.get(8)?,
                attempt_count: attempt_count as u8,
                expires_at: row.get(10)?,
                file_name: row.get(11)?,
                tree: row.get(12)?,
                original_size: original_size as u64,
                compressed_size: compressed_size as u64,
                intended_receiver: row.get(15)?,
                actual_receiver: row.get(16)?,
                accessed_at: row.get(17)?,
                created_at: row.get(18)?,
            })
            .map(|record| (record, status))
        });

        match result {
            Ok((mut record, status)) => {
                record.status = LegacyStatus::parse(&status)?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn compare_and_update_legacy(
        &self,
        expected_version: u64,
        record: &LegacyRecord,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                r#"
                UPDATE legacy_transfers
                SET version = version + 1, status = ?, ciphertext = ?,
                    encrypted_key = ?, private_key_p = ?, private_key_x = ?,
                    huffman_tree = ?, attempt_count = ?, actual_receiver = ?,
                    accessed_at = ?
                WHERE id = ? AND version = ?
                "#,
                params![
                    record.status.as_str(),
                    record.ciphertext,
                    record.encrypted_key,
                    record.private_key_p,
                    record.private_key_x,
                    record.tree,
                    record.attempt_count as i64,
                    record.actual_receiver,
                    record.accessed_at,
                    record.id.as_bytes().as_slice(),
                    expected_version as i64,
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to update transfer: {}", e)))?;
        Ok(rows > 0)
    }

    fn delete_legacy(&self, id: &TransferId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM legacy_transfers WHERE id = ?",
                params![id.as_bytes().as_slice()],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    fn create_session(&self, record: &SessionRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO sessions
                (id, version, status, sender, key_p, key_g, key_y, ciphertext,
                 encrypted_key, digest, file_name, huffman_tree, original_size,
                 compressed_size, attempt_count, expires_at, created_at,
                 receiver_joined_at, key_generated_at, file_uploaded_at,
                 accessed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    record.id.as_bytes().as_slice(),
                    record.version as i64,
                    record.status.as_str(),
                    record.sender,
                    record.key_p,
                    record.key_g,
                    record.key_y,
                    record.ciphertext,
                    record.encrypted_key,
                    record.digest.as_ref().map(|d| d.as_slice()),
                    record.file_name,
                    record.tree,
                    record.original_size as i64,
                    record.compressed_size as i64,
                    record.attempt_count as i64,
                    record.expires_at,
                    record.created_at,
                    record.receiver_joined_at,
                    record.key_generated_at,
                    record.file_uploaded_at,
                    record.accessed_at,
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to store session: {}", e)))?;
        Ok(())
    }

    fn get_session(&self, id: &TransferId) -> Result<Option<SessionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, version, status, sender, key_p, key_g, key_y,
                       ciphertext, encrypted_key, digest, file_name,
                       huffman_tree, original_size, compressed_size,
                       attempt_count, expires_at, created_at,
                       receiver_joined_at, key_generated_at, file_uploaded_at,
                       accessed_at
                FROM sessions WHERE id = ?
                "#,
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = stmt.query_row(params![id.as_bytes().as_slice()], |row| {
            let id = id_from_blob(row.get(0)?)?;
            let version: i64 = row.get(1)?;
            let status: String = row.get(2)?;
            let digest_blob: Option<Vec<u8>> = row.get(9)?;
            let digest = digest_blob.map(digest_from_blob).transpose()?;
            let original_size: i64 = row.get(12)?;
            let compressed_size: i64 = row.get(13)?;
            let attempt_count: i64 = row.get(14)?;
            Ok(SessionRecord {
                id,
                version: version as u64,
                status: SessionStatus::WaitingForReceiver, // replaced below
                sender: row.get(3)?,
                key_p: row.get(4)?,
                key_g: row.get(5)?,
                key_y: row.get(6)?,
                ciphertext: row.get(7)?,
                encrypted_key: row.get(8)?,
                digest,
                file_name: row.get(10)?,
                tree: row.get(11)?,
                original_size: original_size as u64,
                compressed_size: compressed_size as u64,
                attempt_count: attempt_count as u8,
                expires_at: row.get(15)?,
                created_at: row.get(16)?,
                receiver_joined_at: row.get(17)?,
                key_generated_at: row.get(18)?,
                file_uploaded_at: row.get(19)?,
                accessed_at: row.get(20)?,
            })
            .map(|record| (record, status))
        });

        match result {
            Ok((mut record, status)) => {
                record.status = SessionStatus::parse(&status)?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn compare_and_update_session(
        &self,
        expected_version: u64,
        record: &SessionRecord,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                r#"
                UPDATE sessions
                SET version = version + 1, status = ?, key_p = ?, key_g = ?,
                    key_y = ?, ciphertext = ?, encrypted_key = ?, digest = ?,
                    file_name = ?, huffman_tree = ?, original_size = ?,
                    compressed_size = ?, attempt_count = ?,
                    receiver_joined_at = ?, key_generated_at = ?,
                    file_uploaded_at = ?, accessed_at = ?
                WHERE id = ? AND version = ?
                "#,
                params![
                    record.status.as_str(),
                    record.key_p,
                    record.key_g,
                    record.key_y,
                    record.ciphertext,
                    record.encrypted_key,
                    record.digest.as_ref().map(|d| d.as_slice()),
                    record.file_name,
                    record.tree,
                    record.original_size as i64,
                    record.compressed_size as i64,
                    record.attempt_count as i64,
                    record.receiver_joined_at,
                    record.key_generated_at,
                    record.file_uploaded_at,
                    record.accessed_at,
                    record.id.as_bytes().as_slice(),
                    expected_version as i64,
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to update session: {}", e)))?;
        Ok(rows > 0)
    }

    fn delete_session(&self, id: &TransferId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE id = ?",
                params![id.as_bytes().as_slice()],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    fn sweep(&self, now: i64) -> Result<usize> {
        let legacy = self
            .conn
            .execute(
                "DELETE FROM legacy_transfers
                 WHERE expires_at <= ? OR status IN ('expired', 'consumed')",
                params![now],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let sessions = self
            .conn
            .execute(
                "DELETE FROM sessions
                 WHERE expires_at <= ? OR status IN ('expired', 'consumed')",
                params![now],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(legacy + sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_db() -> Database {
        let config = DatabaseConfig {
            path: String::new(),
            in_memory: true,
        };
        Database::open(&config).expect("should open")
    }

    fn sample_legacy(rng: &mut StdRng, expires_at: i64) -> LegacyRecord {
        LegacyRecord {
            id: TransferId::generate(rng),
            version: 0,
            status: LegacyStatus::Active,
            ciphertext: vec![1, 2, 3],
            encrypted_key: vec![4, 5],
            private_key_p: vec![6],
            private_key_x: vec![7],
            digest: [9u8; 32],
            hashed_pin: "ab".repeat(32),
            attempt_count: 0,
            expires_at,
            file_name: "report.pdf".into(),
            tree: vec![8],
            original_size: 3,
            compressed_size: 3,
            intended_receiver: Some("alice".into()),
            actual_receiver: None,
            accessed_at: None,
            created_at: 1000,
        }
    }

    fn sample_session(rng: &mut StdRng, expires_at: i64) -> SessionRecord {
        SessionRecord {
            id: TransferId::generate(rng),
            version: 0,
            status: SessionStatus::WaitingForReceiver,
            sender: "bob".into(),
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
            created_at: 1000,
            receiver_joined_at: None,
            key_generated_at: None,
            file_uploaded_at: None,
            accessed_at: None,
        }
    }

    #[test]
    fn test_legacy_round_trip() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(1);
        let record = sample_legacy(&mut rng, 2000);

        db.create_legacy(&record).expect("create");
        let loaded = db
            .get_legacy(&record.id)
            .expect("get")
            .expect("should exist");

        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.status, LegacyStatus::Active);
        assert_eq!(loaded.ciphertext, record.ciphertext);
        assert_eq!(loaded.digest, record.digest);
        assert_eq!(loaded.intended_receiver, record.intended_receiver);
        assert_eq!(loaded.version, 0);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(2);
        let id = TransferId::generate(&mut rng);
        assert!(db.get_legacy(&id).expect("get").is_none());
        assert!(db.get_session(&id).expect("get").is_none());
    }

    #[test]
    fn test_legacy_cas_bumps_version() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(3);
        let record = sample_legacy(&mut rng, 2000);
        db.create_legacy(&record).expect("create");

        let mut updated = record.clone();
        updated.attempt_count = 1;
        assert!(db.compare_and_update_legacy(0, &updated).expect("cas"));

        let loaded = db.get_legacy(&record.id).expect("get").expect("exists");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.attempt_count, 1);
    }

    #[test]
    fn test_legacy_cas_detects_conflict() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(4);
        let record = sample_legacy(&mut rng, 2000);
        db.create_legacy(&record).expect("create");

        let mut first = record.clone();
        first.attempt_count = 1;
        assert!(db.compare_and_update_legacy(0, &first).expect("cas"));

        // A second writer that read version 0 must lose.
        let mut stale = record.clone();
        stale.attempt_count = 1;
        assert!(!db.compare_and_update_legacy(0, &stale).expect("cas"));

        let loaded = db.get_legacy(&record.id).expect("get").expect("exists");
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_session_round_trip_and_cas() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(5);
        let record = sample_session(&mut rng, 2000);
        db.create_session(&record).expect("create");

        let mut keyed = record.clone();
        keyed.status = SessionStatus::KeyGenerated;
        keyed.key_p = vec![0x0b];
        keyed.key_g = vec![0x02];
        keyed.key_y = vec![0x03];
        keyed.key_generated_at = Some(1500);
        assert!(db.compare_and_update_session(0, &keyed).expect("cas"));

        let loaded = db.get_session(&record.id).expect("get").expect("exists");
        assert_eq!(loaded.status, SessionStatus::KeyGenerated);
        assert_eq!(loaded.key_p, vec![0x0b]);
        assert_eq!(loaded.version, 1);
        assert!(loaded.digest.is_none());

        // Stale writer loses.
        assert!(!db.compare_and_update_session(0, &keyed).expect("cas"));
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(6);
        let record = sample_legacy(&mut rng, 2000);
        db.create_legacy(&record).expect("create");
        db.delete_legacy(&record.id).expect("delete");
        assert!(db.get_legacy(&record.id).expect("get").is_none());
    }

    #[test]
    fn test_sweep_removes_expired_and_terminal() {
        let db = test_db();
        let mut rng = StdRng::seed_from_u64(7);

        let expired = sample_legacy(&mut rng, 1000);
        let live = sample_legacy(&mut rng, 9000);
        let mut consumed = sample_legacy(&mut rng, 9000);
        consumed.status = LegacyStatus::Consumed;

        db.create_legacy(&expired).expect("create");
        db.create_legacy(&live).expect("create");
        db.create_legacy(&consumed).expect("create");

        let swept = db.sweep(5000).expect("sweep");
        assert_eq!(swept, 2);
        assert!(db.get_legacy(&expired.id).expect("get").is_none());
        assert!(db.get_legacy(&consumed.id).expect("get").is_none());
        assert!(db.get_legacy(&live.id).expect("get").is_some());
    }
}
