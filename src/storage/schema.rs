//! Database schema definitions.

use rusqlite::Connection;

use crate::storage::StorageError;

/// SQL statement for creating the devices table.
///
/// One row per edge device, upserted on first ingest or heartbeat and never
/// deleted. The trailing columns are the optional per-device config override;
/// NULL means "fall back to the global default".
pub const DEVICES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    device_id                 TEXT PRIMARY KEY,
    device_key                TEXT NOT NULL,
    last_seen                 TEXT NOT NULL,
    rssi                      INTEGER,
    battery_mv                INTEGER,
    fw_version                TEXT,
    capture_interval_s        INTEGER,
    burst_fps                 INTEGER,
    burst_duration_s          INTEGER,
    burst_cooldown_s          INTEGER,
    interaction_threshold     REAL,
    interaction_min_frames    INTEGER,
    interaction_end_timeout_s INTEGER
);
"#;

/// SQL statement for creating the captures table.
///
/// `UNIQUE(device_id, seq)` is the deduplication invariant: a violated insert
/// fails atomically and the surrounding transaction is rolled back.
pub const CAPTURES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS captures (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id         TEXT NOT NULL,
    capture_ts        TEXT NOT NULL,
    received_ts       TEXT NOT NULL,
    seq               INTEGER NOT NULL,
    width             INTEGER NOT NULL,
    height            INTEGER NOT NULL,
    jpeg_quality      INTEGER NOT NULL,
    storage_uri       TEXT,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    UNIQUE (device_id, seq)
);
"#;

/// SQL statement for creating the jobs table (1:1 with captures).
pub const JOBS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    capture_id INTEGER NOT NULL,
    status     TEXT NOT NULL DEFAULT 'queued',
    attempts   INTEGER NOT NULL DEFAULT 0,
    created_ts TEXT NOT NULL,
    updated_ts TEXT NOT NULL,
    last_error TEXT
);
"#;

/// SQL statement for creating the events table (append-only worker output).
pub const EVENTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    capture_id INTEGER NOT NULL,
    device_id  TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_ts   TEXT NOT NULL,
    confidence REAL,
    note       TEXT
);
"#;

/// SQL statement for creating the ingest audit log (append-only, one row per
/// frame-ingest attempt; heartbeats are deliberately not audited).
pub const INGEST_AUDIT_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_audit (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    request_ts TEXT NOT NULL,
    endpoint   TEXT NOT NULL,
    ok         INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL
);
"#;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist. Safe to call repeatedly.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(DEVICES_TABLE_DDL)?;
    conn.execute_batch(CAPTURES_TABLE_DDL)?;
    conn.execute_batch(JOBS_TABLE_DDL)?;
    conn.execute_batch(EVENTS_TABLE_DDL)?;
    conn.execute_batch(INGEST_AUDIT_TABLE_DDL)?;

    tracing::info!("Database schema initialized");
    Ok(())
}
