//! Core data types for the storage layer.
//!
//! This module defines the rows the rest of the system moves around:
//!
//! - [`Device`]: edge device identity, telemetry, and config overrides
//! - [`Capture`]: one ingested frame
//! - [`Job`] / [`JobStatus`]: background work bound 1:1 to a capture
//! - [`NewEvent`] / [`EventView`]: processing output, append-only
//! - [`IngestAuditRecord`]: one row per frame-ingest attempt

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Current time formatted the way timestamps are persisted (RFC 3339, UTC).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted RFC 3339 timestamp back into UTC.
///
/// Returns `None` for unparsable values; callers decide whether that excludes
/// the row (windowed metrics) or not (all-time totals).
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// An edge device row, created/updated on first ingest or heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub last_seen: String,
    pub rssi: Option<i64>,
    pub battery_mv: Option<i64>,
    pub fw_version: Option<String>,
}

/// Telemetry fields carried by a heartbeat; all optional, upserted as-is.
#[derive(Debug, Clone, Default)]
pub struct DeviceTelemetry {
    pub rssi: Option<i64>,
    pub battery_mv: Option<i64>,
    pub fw_version: Option<String>,
}

/// Resolved device configuration returned to the capture client.
///
/// Per-device overrides stored on the device row win; unset fields fall back
/// to the configured global defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub capture_interval_s: i64,
    pub burst_fps: i64,
    pub burst_duration_s: i64,
    pub burst_cooldown_s: i64,
    pub interaction_threshold: f64,
    pub interaction_min_frames: i64,
    pub interaction_end_timeout_s: i64,
}

/// Per-device override columns as stored (NULL means "no override").
#[derive(Debug, Clone, Default)]
pub struct DeviceConfigOverride {
    pub capture_interval_s: Option<i64>,
    pub burst_fps: Option<i64>,
    pub burst_duration_s: Option<i64>,
    pub burst_cooldown_s: Option<i64>,
    pub interaction_threshold: Option<f64>,
    pub interaction_min_frames: Option<i64>,
    pub interaction_end_timeout_s: Option<i64>,
}

/// Processing state of a capture, mutated only by the worker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProcessingStatus {
    Pending,
    Processed,
}

/// One ingested frame's metadata and optional staged image reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: i64,
    pub device_id: String,
    /// Device-reported capture timestamp (stored verbatim).
    pub capture_ts: String,
    /// Server receive timestamp (RFC 3339).
    pub received_ts: String,
    /// Device-monotonic sequence number; `(device_id, seq)` is unique.
    pub seq: i64,
    pub width: i64,
    pub height: i64,
    pub jpeg_quality: i64,
    pub storage_uri: Option<String>,
    pub processing_status: ProcessingStatus,
}

/// Fields for inserting a new capture; the id and status are store-assigned.
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub device_id: String,
    pub capture_ts: String,
    pub received_ts: String,
    pub seq: i64,
    pub width: i64,
    pub height: i64,
    pub jpeg_quality: i64,
    pub storage_uri: Option<String>,
}

/// Job lifecycle states.
///
/// `queued -> running -> {done | failed}`. `Dead` is reserved for a future
/// promotion policy and is never entered by the current worker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Dead,
}

impl JobStatus {
    /// Statuses that count toward queue depth.
    pub const DEPTH_STATUSES: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Dead,
    ];
}

/// A queued unit of background work bound 1:1 to a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub capture_id: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub created_ts: String,
    pub updated_ts: String,
    pub last_error: Option<String>,
}

/// A job freshly won by an atomic claim.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub capture_id: i64,
    pub attempts: i64,
}

/// An event to append; the id is store-assigned.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub event_ts: String,
    pub confidence: Option<f64>,
    pub note: Option<String>,
}

/// Admin view of an event joined with its capture's staged image URI.
#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: i64,
    pub device_id: String,
    pub event_type: String,
    pub event_ts: String,
    pub note: Option<String>,
    pub storage_uri: Option<String>,
}

/// One ingest attempt, success or failure. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAuditRecord {
    pub request_ts: String,
    pub endpoint: String,
    pub ok: bool,
    pub latency_ms: i64,
}
