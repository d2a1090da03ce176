//! The store facade.
//!
//! All components read and write through [`Store`]; it is the sole
//! synchronization point between the ingestion gateway and the worker. Each
//! method checks a pooled connection out for exactly one operation or
//! transaction, so the connection is released on every exit path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::storage::pool::StorePool;
use crate::storage::schema::init_schema;
use crate::storage::types::{
    now_iso, Capture, ClaimedJob, Device, DeviceConfigOverride, DeviceTelemetry, EventView,
    IngestAuditRecord, Job, JobStatus, NewCapture, NewEvent, ProcessingStatus,
};
use crate::storage::StorageError;

/// Result of attempting to insert a capture with its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInsert {
    /// Capture and job committed; carries the new capture id.
    Inserted { capture_id: i64 },
    /// `(device_id, seq)` already exists; the whole transaction rolled back,
    /// including the device upsert from this attempt.
    DuplicateSeq,
}

/// Row count and last-write timestamp for one table.
#[derive(Debug, Clone)]
pub struct TableActivity {
    pub name: &'static str,
    pub rows: i64,
    pub last_write: Option<String>,
}

/// Tables reported by the database metrics group, with the column that
/// represents their most recent write.
const TABLE_ACTIVITY_COLUMNS: [(&str, &str); 5] = [
    ("captures", "MAX(received_ts)"),
    ("events", "MAX(event_ts)"),
    ("jobs", "MAX(updated_ts)"),
    ("devices", "MAX(last_seen)"),
    ("ingest_audit", "MAX(request_ts)"),
];

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Arc<StorePool>,
    db_path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database, initialize the schema, and build the
    /// connection pool.
    pub fn open(db_path: impl AsRef<Path>, pool_size: u32) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Internal(format!(
                        "failed to create database directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let pool = StorePool::new(&db_path, pool_size)?;
        let conn = pool.get()?;
        init_schema(&conn)?;

        Ok(Self { pool, db_path })
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Size of the database file on disk, in bytes. Zero when absent.
    pub fn db_file_size(&self) -> u64 {
        std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
    }

    // =========================================================================
    // Ingestion transaction
    // =========================================================================

    /// Persist one ingested frame: device upsert + capture insert + job insert,
    /// all-or-nothing.
    ///
    /// A `UNIQUE(device_id, seq)` violation rolls the entire transaction back
    /// (the device's `last_seen` from this attempt is not retained) and is
    /// reported as [`FrameInsert::DuplicateSeq`] rather than an error.
    pub fn insert_frame(
        &self,
        device_key: &str,
        capture: &NewCapture,
    ) -> Result<FrameInsert, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO devices (device_id, device_key, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(device_id) DO UPDATE SET last_seen = excluded.last_seen",
            params![capture.device_id, device_key, capture.received_ts],
        )?;

        let inserted = tx.execute(
            "INSERT INTO captures (device_id, capture_ts, received_ts, seq, width, height, jpeg_quality, storage_uri)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                capture.device_id,
                capture.capture_ts,
                capture.received_ts,
                capture.seq,
                capture.width,
                capture.height,
                capture.jpeg_quality,
                capture.storage_uri,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                tx.rollback()?;
                return Ok(FrameInsert::DuplicateSeq);
            }
            Err(e) => return Err(e.into()),
        }

        let capture_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO jobs (capture_id, status, created_ts, updated_ts)
             VALUES (?1, 'queued', ?2, ?3)",
            params![capture_id, capture.received_ts, capture.received_ts],
        )?;

        tx.commit()?;
        Ok(FrameInsert::Inserted { capture_id })
    }

    /// Unconditional telemetry upsert driven by a heartbeat.
    pub fn upsert_heartbeat(
        &self,
        device_id: &str,
        device_key: &str,
        telemetry: &DeviceTelemetry,
        last_seen: &str,
    ) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO devices (device_id, device_key, last_seen, rssi, battery_mv, fw_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id) DO UPDATE SET
               last_seen = excluded.last_seen,
               rssi = excluded.rssi,
               battery_mv = excluded.battery_mv,
               fw_version = excluded.fw_version",
            params![
                device_id,
                device_key,
                last_seen,
                telemetry.rssi,
                telemetry.battery_mv,
                telemetry.fw_version,
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Device reads
    // =========================================================================

    /// Stored per-device config override, or `None` for an unknown device.
    pub fn device_config_override(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceConfigOverride>, StorageError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT capture_interval_s, burst_fps, burst_duration_s, burst_cooldown_s,
                    interaction_threshold, interaction_min_frames, interaction_end_timeout_s
             FROM devices WHERE device_id = ?1",
            [device_id],
            |row| {
                Ok(DeviceConfigOverride {
                    capture_interval_s: row.get(0)?,
                    burst_fps: row.get(1)?,
                    burst_duration_s: row.get(2)?,
                    burst_cooldown_s: row.get(3)?,
                    interaction_threshold: row.get(4)?,
                    interaction_min_frames: row.get(5)?,
                    interaction_end_timeout_s: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// All known devices, ordered by device id.
    pub fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, last_seen, rssi, battery_mv, fw_version
             FROM devices ORDER BY device_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Device {
                device_id: row.get(0)?,
                last_seen: row.get(1)?,
                rssi: row.get(2)?,
                battery_mv: row.get(3)?,
                fw_version: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    // =========================================================================
    // Job queue
    // =========================================================================

    /// Atomically claim the single oldest queued job, if any.
    ///
    /// One conditional UPDATE: it flips the row to `running`, increments
    /// `attempts`, stamps `updated_ts`, and reports via RETURNING whether it
    /// actually won the row. At most one claimant can win a given job even
    /// with concurrent workers.
    pub fn claim_next_job(&self) -> Result<Option<ClaimedJob>, StorageError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "UPDATE jobs
             SET status = 'running', attempts = attempts + 1, updated_ts = ?1
             WHERE id = (SELECT id FROM jobs WHERE status = 'queued' ORDER BY id LIMIT 1)
               AND status = 'queued'
             RETURNING id, capture_id, attempts",
            [now_iso()],
            |row| {
                Ok(ClaimedJob {
                    id: row.get(0)?,
                    capture_id: row.get(1)?,
                    attempts: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Load the capture a job points at.
    pub fn load_capture(&self, capture_id: i64) -> Result<Option<Capture>, StorageError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, device_id, capture_ts, received_ts, seq, width, height, jpeg_quality,
                    storage_uri, processing_status
             FROM captures WHERE id = ?1",
            [capture_id],
            map_capture_row,
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Terminal success: append produced events, mark the capture processed,
    /// and mark the job done in one transaction.
    pub fn complete_job(
        &self,
        job_id: i64,
        capture: &Capture,
        events: &[NewEvent],
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        for event in events {
            tx.execute(
                "INSERT INTO events (capture_id, device_id, event_type, event_ts, confidence, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    capture.id,
                    capture.device_id,
                    event.event_type,
                    event.event_ts,
                    event.confidence,
                    event.note,
                ],
            )?;
        }
        tx.execute(
            "UPDATE captures SET processing_status = 'processed' WHERE id = ?1",
            [capture.id],
        )?;
        tx.execute(
            "UPDATE jobs SET status = 'done', updated_ts = ?1 WHERE id = ?2",
            params![now_iso(), job_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Terminal failure: record the error on the job row.
    pub fn fail_job(&self, job_id: i64, error: &str) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE jobs SET status = 'failed', last_error = ?1, updated_ts = ?2 WHERE id = ?3",
            params![error, now_iso(), job_id],
        )?;
        Ok(())
    }

    /// Load one job row (admin and test visibility).
    pub fn job(&self, job_id: i64) -> Result<Option<Job>, StorageError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, capture_id, status, attempts, created_ts, updated_ts, last_error
             FROM jobs WHERE id = ?1",
            [job_id],
            |row| {
                Ok(Job {
                    id: row.get(0)?,
                    capture_id: row.get(1)?,
                    status: JobStatus::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(JobStatus::Queued),
                    attempts: row.get(3)?,
                    created_ts: row.get(4)?,
                    updated_ts: row.get(5)?,
                    last_error: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Per-status job counts.
    pub fn job_status_counts(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        rows.collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(StorageError::from)
    }

    // =========================================================================
    // Events and audit
    // =========================================================================

    /// Newest events first, joined with the owning capture's staged image URI.
    pub fn recent_events(&self, limit: i64) -> Result<Vec<EventView>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.device_id, e.event_type, e.event_ts, e.note, c.storage_uri
             FROM events e
             JOIN captures c ON c.id = e.capture_id
             ORDER BY e.event_ts DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(EventView {
                id: row.get(0)?,
                device_id: row.get(1)?,
                event_type: row.get(2)?,
                event_ts: row.get(3)?,
                note: row.get(4)?,
                storage_uri: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    /// Append one ingest audit row.
    pub fn record_ingest_audit(&self, record: &IngestAuditRecord) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO ingest_audit (request_ts, endpoint, ok, latency_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.request_ts, record.endpoint, record.ok, record.latency_ms],
        )?;
        Ok(())
    }

    /// Every audit row, for on-demand aggregation.
    pub fn audit_records(&self) -> Result<Vec<IngestAuditRecord>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT request_ts, endpoint, ok, latency_ms FROM ingest_audit")?;
        let rows = stmt.query_map([], |row| {
            Ok(IngestAuditRecord {
                request_ts: row.get(0)?,
                endpoint: row.get(1)?,
                ok: row.get(2)?,
                latency_ms: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    // =========================================================================
    // Table statistics
    // =========================================================================

    /// Row count and last-write timestamp for each core table.
    pub fn table_activity(&self) -> Result<Vec<TableActivity>, StorageError> {
        let conn = self.pool.get()?;
        let mut out = Vec::with_capacity(TABLE_ACTIVITY_COLUMNS.len());
        for (name, column) in TABLE_ACTIVITY_COLUMNS {
            let rows: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {name}"), [], |r| r.get(0))?;
            let last_write: Option<String> =
                conn.query_row(&format!("SELECT {column} FROM {name}"), [], |r| r.get(0))?;
            out.push(TableActivity { name, rows, last_write });
        }
        Ok(out)
    }

    /// SQLite library version string.
    pub fn engine_version(&self) -> &'static str {
        rusqlite::version()
    }
}

/// Map a `captures` row in SELECT column order.
fn map_capture_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capture> {
    Ok(Capture {
        id: row.get(0)?,
        device_id: row.get(1)?,
        capture_ts: row.get(2)?,
        received_ts: row.get(3)?,
        seq: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        jpeg_quality: row.get(7)?,
        storage_uri: row.get(8)?,
        processing_status: ProcessingStatus::from_str(&row.get::<_, String>(9)?)
            .unwrap_or(ProcessingStatus::Pending),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Scoped raw access for tests and tooling.
#[allow(dead_code)]
pub(crate) fn with_raw_conn<T>(
    store: &Store,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T, StorageError> {
    let conn = store.pool.get()?;
    f(&conn).map_err(StorageError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), 4).unwrap();
        (store, dir)
    }

    fn new_capture(device_id: &str, seq: i64, received_ts: &str) -> NewCapture {
        NewCapture {
            device_id: device_id.to_string(),
            capture_ts: "2026-02-12T00:00:00Z".to_string(),
            received_ts: received_ts.to_string(),
            seq,
            width: 640,
            height: 480,
            jpeg_quality: 12,
            storage_uri: None,
        }
    }

    #[test]
    fn test_insert_frame_creates_capture_and_job() {
        let (store, _dir) = test_store();

        let result = store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T00:00:01Z"))
            .unwrap();
        let capture_id = match result {
            FrameInsert::Inserted { capture_id } => capture_id,
            other => panic!("expected insert, got {other:?}"),
        };

        let capture = store.load_capture(capture_id).unwrap().unwrap();
        assert_eq!(capture.device_id, "cam-1");
        assert_eq!(capture.seq, 1);
        assert_eq!(capture.processing_status, ProcessingStatus::Pending);

        let counts = store.job_status_counts().unwrap();
        assert_eq!(counts.get("queued"), Some(&1));
    }

    #[test]
    fn test_duplicate_seq_rolls_back_device_upsert() {
        let (store, _dir) = test_store();

        store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T00:00:01Z"))
            .unwrap();

        // Second attempt with the same (device_id, seq) and a newer last_seen.
        let result = store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T09:09:09Z"))
            .unwrap();
        assert_eq!(result, FrameInsert::DuplicateSeq);

        let devices = store.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].last_seen, "2026-02-12T00:00:01Z",
            "duplicate attempt must not retain its device upsert"
        );

        let counts = store.job_status_counts().unwrap();
        assert_eq!(counts.get("queued"), Some(&1), "no orphan job rows");
    }

    #[test]
    fn test_claim_is_fifo_and_increments_attempts() {
        let (store, _dir) = test_store();
        for seq in 1..=3 {
            store
                .insert_frame("dev-key", &new_capture("cam-1", seq, "2026-02-12T00:00:01Z"))
                .unwrap();
        }

        let first = store.claim_next_job().unwrap().unwrap();
        let second = store.claim_next_job().unwrap().unwrap();
        assert!(first.id < second.id, "claims must be oldest-first");
        assert_eq!(first.attempts, 1);

        let job = store.job(first.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_claim_on_empty_queue() {
        let (store, _dir) = test_store();
        assert!(store.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn test_claim_wins_each_job_once() {
        let (store, _dir) = test_store();
        store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T00:00:01Z"))
            .unwrap();

        assert!(store.claim_next_job().unwrap().is_some());
        assert!(
            store.claim_next_job().unwrap().is_none(),
            "a running job must not be claimable again"
        );
    }

    #[test]
    fn test_complete_job_marks_capture_and_job() {
        let (store, _dir) = test_store();
        store
            .insert_frame("dev-key", &new_capture("cam-1", 3, "2026-02-12T00:00:01Z"))
            .unwrap();

        let claimed = store.claim_next_job().unwrap().unwrap();
        let capture = store.load_capture(claimed.capture_id).unwrap().unwrap();
        let events = vec![NewEvent {
            event_type: "interaction_detected".to_string(),
            event_ts: now_iso(),
            confidence: Some(0.55),
            note: Some("test".to_string()),
        }];
        store.complete_job(claimed.id, &capture, &events).unwrap();

        let job = store.job(claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        let capture = store.load_capture(capture.id).unwrap().unwrap();
        assert_eq!(capture.processing_status, ProcessingStatus::Processed);

        let views = store.recent_events(10).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].event_type, "interaction_detected");
        assert_eq!(views[0].device_id, "cam-1");
    }

    #[test]
    fn test_fail_job_records_error() {
        let (store, _dir) = test_store();
        store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T00:00:01Z"))
            .unwrap();
        let claimed = store.claim_next_job().unwrap().unwrap();

        store.fail_job(claimed.id, "missing capture: 42").unwrap();

        let job = store.job(claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("missing capture: 42"));
    }

    #[test]
    fn test_heartbeat_upsert_overwrites_telemetry() {
        let (store, _dir) = test_store();
        let telemetry = DeviceTelemetry {
            rssi: Some(-61),
            battery_mv: Some(3900),
            fw_version: Some("1.2.0".to_string()),
        };
        store
            .upsert_heartbeat("cam-1", "dev-key", &telemetry, "2026-02-12T00:00:01Z")
            .unwrap();
        store
            .upsert_heartbeat(
                "cam-1",
                "dev-key",
                &DeviceTelemetry::default(),
                "2026-02-12T00:05:00Z",
            )
            .unwrap();

        let devices = store.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].last_seen, "2026-02-12T00:05:00Z");
        assert_eq!(devices[0].rssi, None, "telemetry upsert is unconditional");
    }

    #[test]
    fn test_device_config_override_unknown_device() {
        let (store, _dir) = test_store();
        assert!(store.device_config_override("ghost").unwrap().is_none());
    }

    #[test]
    fn test_audit_round_trip() {
        let (store, _dir) = test_store();
        store
            .record_ingest_audit(&IngestAuditRecord {
                request_ts: now_iso(),
                endpoint: "/ingest/frame".to_string(),
                ok: false,
                latency_ms: 7,
            })
            .unwrap();

        let records = store.audit_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].ok);
        assert_eq!(records[0].endpoint, "/ingest/frame");
    }

    #[test]
    fn test_table_activity_reports_all_tables() {
        let (store, _dir) = test_store();
        store
            .insert_frame("dev-key", &new_capture("cam-1", 1, "2026-02-12T00:00:01Z"))
            .unwrap();

        let activity = store.table_activity().unwrap();
        assert_eq!(activity.len(), 5);
        let captures = activity.iter().find(|t| t.name == "captures").unwrap();
        assert_eq!(captures.rows, 1);
        assert_eq!(captures.last_write.as_deref(), Some("2026-02-12T00:00:01Z"));
        let events = activity.iter().find(|t| t.name == "events").unwrap();
        assert_eq!(events.rows, 0);
        assert!(events.last_write.is_none());
    }
}
