//! Ingestion gateway.
//!
//! Validates and persists frames and heartbeats. Frame persistence is one
//! atomic transaction (device upsert + capture insert + job insert); every
//! frame-ingest attempt, success or failure, is recorded in the audit log.
//! Heartbeats are deliberately excluded from audit metrics.
//!
//! Outcomes are propagated by value as [`IngestError`] variants rather than by
//! unwinding across the transaction boundary; the server layer maps them onto
//! HTTP statuses.

use std::path::PathBuf;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::config::DeviceDefaults;
use crate::storage::{
    now_iso, DeviceConfig, DeviceTelemetry, FrameInsert, IngestAuditRecord, NewCapture,
    StorageError, Store,
};

/// Endpoint tag written into audit rows for frame ingests.
pub const FRAME_ENDPOINT: &str = "/ingest/frame";

/// Required fields of a frame payload, in validation order.
const FRAME_REQUIRED_FIELDS: [&str; 6] = [
    "device_id",
    "capture_ts",
    "seq",
    "width",
    "height",
    "jpeg_quality",
];

/// Integer fields parsed independently, each with a field-specific error.
const FRAME_INT_FIELDS: [&str; 4] = ["seq", "width", "height", "jpeg_quality"];

/// Why an ingest attempt was rejected.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Credential mismatch.
    #[error("invalid device key")]
    Unauthorized,

    /// Terminal request validation failure; no persistence happened.
    #[error("{0}")]
    Validation(String),

    /// `(device_id, seq)` already ingested; the store is unchanged.
    #[error("duplicate device seq")]
    DuplicateSeq,

    /// Storage-layer failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Successful frame ingest.
#[derive(Debug, Clone)]
pub struct FrameAccepted {
    pub frame_id: i64,
    pub received_ts: String,
}

/// Successful heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatAccepted {
    pub last_seen: String,
}

/// Gateway for device-facing ingestion.
#[derive(Clone)]
pub struct IngestGateway {
    store: Store,
    device_key: String,
    staging_dir: PathBuf,
    defaults: DeviceDefaults,
}

impl IngestGateway {
    pub fn new(
        store: Store,
        device_key: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        defaults: DeviceDefaults,
    ) -> Self {
        Self {
            store,
            device_key: device_key.into(),
            staging_dir: staging_dir.into(),
            defaults,
        }
    }

    /// Directory holding staged frame images.
    pub fn staging_dir(&self) -> &PathBuf {
        &self.staging_dir
    }

    /// Ingest one frame from its raw request body.
    ///
    /// Records an audit row for the attempt regardless of outcome; latency is
    /// measured from `started` (request start) to the audit write.
    pub fn ingest_frame(
        &self,
        device_key: Option<&str>,
        body: &[u8],
        started: Instant,
    ) -> Result<FrameAccepted, IngestError> {
        let result = self.ingest_frame_inner(device_key, body);

        // Storage faults skip the audit write: the same store just failed.
        if !matches!(result, Err(IngestError::Storage(_))) {
            let record = IngestAuditRecord {
                request_ts: now_iso(),
                endpoint: FRAME_ENDPOINT.to_string(),
                ok: result.is_ok(),
                latency_ms: started.elapsed().as_millis() as i64,
            };
            if let Err(e) = self.store.record_ingest_audit(&record) {
                tracing::warn!(error = %e, "Failed to record ingest audit row");
            }
        }

        result
    }

    fn ingest_frame_inner(
        &self,
        device_key: Option<&str>,
        body: &[u8],
    ) -> Result<FrameAccepted, IngestError> {
        self.check_key(device_key)?;
        let payload = parse_body(body)?;
        require_fields(&payload, &FRAME_REQUIRED_FIELDS)?;

        let device_id = parse_device_id(&payload)?;
        let capture_ts = payload
            .get("capture_ts")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::Validation("invalid capture_ts".to_string()))?
            .to_string();

        let mut ints = [0i64; FRAME_INT_FIELDS.len()];
        for (slot, field) in ints.iter_mut().zip(FRAME_INT_FIELDS) {
            *slot = parse_int_field(&payload, field)?;
        }
        let [seq, width, height, jpeg_quality] = ints;

        // The staged file name is the frame's identity, so a retried duplicate
        // overwrites the same path even though the relational insert conflicts.
        let storage_uri = match payload.get("image_b64") {
            None | Some(Value::Null) => None,
            Some(value) => Some(self.stage_image(&device_id, seq, value)?),
        };

        let received_ts = now_iso();
        let capture = NewCapture {
            device_id: device_id.clone(),
            capture_ts,
            received_ts: received_ts.clone(),
            seq,
            width,
            height,
            jpeg_quality,
            storage_uri,
        };

        match self.store.insert_frame(&self.device_key, &capture)? {
            FrameInsert::Inserted { capture_id } => {
                tracing::debug!(device_id, seq, capture_id, "Frame ingested");
                Ok(FrameAccepted {
                    frame_id: capture_id,
                    received_ts,
                })
            }
            FrameInsert::DuplicateSeq => {
                tracing::debug!(device_id, seq, "Duplicate frame rejected");
                Err(IngestError::DuplicateSeq)
            }
        }
    }

    /// Process a heartbeat: auth, require `device_id`, unconditional telemetry
    /// upsert. Not recorded into ingest audit metrics (documented behavior).
    pub fn heartbeat(
        &self,
        device_key: Option<&str>,
        body: &[u8],
    ) -> Result<HeartbeatAccepted, IngestError> {
        self.check_key(device_key)?;
        let payload = parse_body(body)?;
        require_fields(&payload, &["device_id"])?;
        let device_id = parse_device_id(&payload)?;

        let telemetry = DeviceTelemetry {
            rssi: payload.get("rssi").and_then(Value::as_i64),
            battery_mv: payload.get("battery_mv").and_then(Value::as_i64),
            fw_version: payload
                .get("fw_version")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        let last_seen = now_iso();
        self.store
            .upsert_heartbeat(&device_id, &self.device_key, &telemetry, &last_seen)?;
        Ok(HeartbeatAccepted { last_seen })
    }

    /// Resolve a device's effective config. Pure read; unknown devices and
    /// unset fields fall back to the configured global defaults.
    pub fn device_config(&self, device_id: &str) -> Result<DeviceConfig, StorageError> {
        let stored = self.store.device_config_override(device_id)?;
        Ok(self.defaults.resolve(stored))
    }

    fn check_key(&self, device_key: Option<&str>) -> Result<(), IngestError> {
        if device_key != Some(self.device_key.as_str()) {
            return Err(IngestError::Unauthorized);
        }
        Ok(())
    }

    fn stage_image(
        &self,
        device_id: &str,
        seq: i64,
        value: &Value,
    ) -> Result<String, IngestError> {
        let encoded = value
            .as_str()
            .ok_or_else(|| IngestError::Validation("invalid image_b64".to_string()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| IngestError::Validation("invalid image_b64".to_string()))?;

        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| StorageError::Internal(format!("failed to create staging dir: {e}")))?;
        let path = self.staging_dir.join(format!("{device_id}-{seq}.jpg"));
        std::fs::write(&path, bytes)
            .map_err(|e| StorageError::Internal(format!("failed to write staged frame: {e}")))?;
        Ok(path.display().to_string())
    }
}

fn parse_body(body: &[u8]) -> Result<Value, IngestError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) if value.is_object() => Ok(value),
        _ => Err(IngestError::Validation("invalid json".to_string())),
    }
}

fn require_fields(payload: &Value, fields: &[&str]) -> Result<(), IngestError> {
    for field in fields {
        if payload.get(field).is_none() {
            return Err(IngestError::Validation(format!(
                "missing required field: {field}"
            )));
        }
    }
    Ok(())
}

/// `device_id` names the staged file, so it must be a plain non-empty string.
fn parse_device_id(payload: &Value) -> Result<String, IngestError> {
    let invalid = || IngestError::Validation("invalid device_id".to_string());
    let id = payload
        .get("device_id")
        .and_then(Value::as_str)
        .ok_or_else(invalid)?;
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(invalid());
    }
    Ok(id.to_string())
}

/// Parse one integer field, accepting JSON integers and numeric strings.
fn parse_int_field(payload: &Value, field: &str) -> Result<i64, IngestError> {
    let value = payload.get(field).unwrap_or(&Value::Null);
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| IngestError::Validation(format!("invalid integer field: {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const KEY: &str = "dev-key";

    fn test_gateway() -> (IngestGateway, Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), 4).unwrap();
        let gateway = IngestGateway::new(
            store.clone(),
            KEY,
            dir.path().join("staging"),
            DeviceDefaults::default(),
        );
        (gateway, store, dir)
    }

    fn frame_payload(seq: i64) -> Value {
        json!({
            "device_id": "cam-1",
            "capture_ts": "2026-02-12T00:00:00Z",
            "seq": seq,
            "width": 640,
            "height": 480,
            "jpeg_quality": 12,
        })
    }

    fn ingest(gateway: &IngestGateway, payload: &Value) -> Result<FrameAccepted, IngestError> {
        gateway.ingest_frame(
            Some(KEY),
            payload.to_string().as_bytes(),
            Instant::now(),
        )
    }

    fn validation_message(result: Result<FrameAccepted, IngestError>) -> String {
        match result {
            Err(IngestError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_device_key() {
        let (gateway, store, _dir) = test_gateway();
        let result = gateway.ingest_frame(
            Some("wrong"),
            frame_payload(1).to_string().as_bytes(),
            Instant::now(),
        );
        assert!(matches!(result, Err(IngestError::Unauthorized)));

        let audit = store.audit_records().unwrap();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].ok);
    }

    #[test]
    fn test_rejects_missing_field() {
        let (gateway, _store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload.as_object_mut().unwrap().remove("width");
        assert_eq!(
            validation_message(ingest(&gateway, &payload)),
            "missing required field: width"
        );
    }

    #[test]
    fn test_rejects_invalid_json_body() {
        let (gateway, store, _dir) = test_gateway();
        let result = gateway.ingest_frame(Some(KEY), b"{not json", Instant::now());
        match result {
            Err(IngestError::Validation(msg)) => assert_eq!(msg, "invalid json"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.audit_records().unwrap().len(), 1);
    }

    #[test]
    fn test_each_integer_field_validated_independently() {
        let (gateway, store, _dir) = test_gateway();

        for field in FRAME_INT_FIELDS {
            let mut payload = frame_payload(1);
            payload[field] = json!("not-an-int");
            assert_eq!(
                validation_message(ingest(&gateway, &payload)),
                format!("invalid integer field: {field}")
            );
        }

        // Each rejection produced an audit-failure row tagged with the endpoint.
        let audit = store.audit_records().unwrap();
        assert_eq!(audit.len(), FRAME_INT_FIELDS.len());
        assert!(audit.iter().all(|r| !r.ok && r.endpoint == FRAME_ENDPOINT));
    }

    #[test]
    fn test_integer_fields_accept_numeric_strings() {
        let (gateway, _store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload["seq"] = json!("7");
        let accepted = ingest(&gateway, &payload).unwrap();
        assert_eq!(accepted.frame_id, 1);
    }

    #[test]
    fn test_rejects_invalid_base64_without_persistence() {
        let (gateway, store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload["image_b64"] = json!("***not-base64***");

        assert_eq!(
            validation_message(ingest(&gateway, &payload)),
            "invalid image_b64"
        );

        assert!(store.load_capture(1).unwrap().is_none(), "no persistence");
        let audit = store.audit_records().unwrap();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].ok);
    }

    #[test]
    fn test_successful_ingest_persists_and_audits() {
        let (gateway, store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload["image_b64"] = json!(BASE64.encode(b"jpeg-bytes"));

        let accepted = ingest(&gateway, &payload).unwrap();
        assert_eq!(accepted.frame_id, 1);

        let capture = store.load_capture(1).unwrap().unwrap();
        let staged = capture.storage_uri.expect("storage_uri recorded");
        assert!(staged.ends_with("cam-1-1.jpg"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"jpeg-bytes");

        let audit = store.audit_records().unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].ok);
    }

    #[test]
    fn test_duplicate_seq_is_conflict_and_overwrites_staged_file() {
        let (gateway, store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload["image_b64"] = json!(BASE64.encode(b"first"));
        ingest(&gateway, &payload).unwrap();

        payload["image_b64"] = json!(BASE64.encode(b"second"));
        let result = ingest(&gateway, &payload);
        assert!(matches!(result, Err(IngestError::DuplicateSeq)));

        // Same identity, same path: the file layer saw the retry.
        let staged = gateway.staging_dir().join("cam-1-1.jpg");
        assert_eq!(std::fs::read(staged).unwrap(), b"second");

        // Exactly one capture and one job survived.
        assert!(store.load_capture(2).unwrap().is_none());
        let counts = store.job_status_counts().unwrap();
        assert_eq!(counts.get("queued"), Some(&1));
    }

    #[test]
    fn test_rejects_path_escaping_device_id() {
        let (gateway, _store, _dir) = test_gateway();
        let mut payload = frame_payload(1);
        payload["device_id"] = json!("../etc/passwd");
        assert_eq!(
            validation_message(ingest(&gateway, &payload)),
            "invalid device_id"
        );
    }

    #[test]
    fn test_heartbeat_upserts_without_audit() {
        let (gateway, store, _dir) = test_gateway();
        let payload = json!({
            "device_id": "cam-2",
            "rssi": -58,
            "battery_mv": 4100,
            "fw_version": "1.3.0",
        });

        let accepted = gateway
            .heartbeat(Some(KEY), payload.to_string().as_bytes())
            .unwrap();
        assert!(!accepted.last_seen.is_empty());

        let devices = store.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rssi, Some(-58));
        assert_eq!(devices[0].fw_version.as_deref(), Some("1.3.0"));

        assert!(
            store.audit_records().unwrap().is_empty(),
            "heartbeats are not audited"
        );
    }

    #[test]
    fn test_heartbeat_requires_device_id() {
        let (gateway, _store, _dir) = test_gateway();
        let result = gateway.heartbeat(Some(KEY), b"{}");
        match result {
            Err(IngestError::Validation(msg)) => {
                assert_eq!(msg, "missing required field: device_id");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_device_config_falls_back_to_defaults() {
        let (gateway, _store, _dir) = test_gateway();
        let config = gateway.device_config("unknown-device").unwrap();
        assert_eq!(config.capture_interval_s, 30);
        assert_eq!(config.interaction_min_frames, 3);
    }
}
