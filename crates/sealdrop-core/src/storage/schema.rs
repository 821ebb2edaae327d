//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
pub const CREATE_SCHEMA: &str = r#"
-- PIN-gated transfers (legacy mode). The server holds the private key
-- material for this mode only.
CREATE TABLE IF NOT EXISTS legacy_transfers (
    id BLOB PRIMARY KEY,
    version INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    ciphertext BLOB NOT NULL,
    encrypted_key BLOB NOT NULL,
    private_key_p BLOB NOT NULL,
    private_key_x BLOB NOT NULL,
    digest BLOB NOT NULL,
    hashed_pin TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    expires_at INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    huffman_tree BLOB NOT NULL,
    original_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    intended_receiver TEXT,
    actual_receiver TEXT,
    accessed_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_legacy_expiry ON legacy_transfers(expires_at);

-- Receiver-keyed sessions (end-to-end mode). Only the public key triple
-- is ever stored; the private exponent never reaches this table.
CREATE TABLE IF NOT EXISTS sessions (
    id BLOB PRIMARY KEY,
    version INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'waiting',
    sender TEXT NOT NULL,
    key_p BLOB NOT NULL,
    key_g BLOB NOT NULL,
    key_y BLOB NOT NULL,
    ciphertext BLOB NOT NULL,
    encrypted_key BLOB NOT NULL,
    digest BLOB,
    file_name TEXT,
    huffman_tree BLOB NOT NULL,
    original_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    receiver_joined_at INTEGER,
    key_generated_at INTEGER,
    file_uploaded_at INTEGER,
    accessed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at);

-- Metadata table
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?);
"#;
