//! HTTP API surface.
//!
//! Thin translation layer: handlers parse the request, delegate to the ingest
//! gateway, store, or metrics aggregator, and map outcomes onto JSON envelopes.
//! Success bodies carry `"ok": true`; failures carry `"ok": false` and a
//! stable `error` string that clients can match on.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::ingest::{IngestError, IngestGateway};
use crate::metrics::MetricsAggregator;
use crate::storage::{StorageError, Store};

/// Header carrying the shared device credential.
pub const DEVICE_KEY_HEADER: &str = "x-device-key";

/// Default `/admin/events` page size.
const DEFAULT_EVENTS_LIMIT: i64 = 20;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: IngestGateway,
    pub store: Store,
    pub metrics: MetricsAggregator,
}

/// An error already mapped to its HTTP status and client-facing message.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "ok": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::DuplicateSeq => StatusCode::CONFLICT,
            IngestError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure during ingest");
                return Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal server error".to_string(),
                };
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Storage failure");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

/// Serialize a struct and fold `"ok": true` into its top-level object.
fn ok_envelope<T: serde::Serialize>(value: &T) -> Result<Json<Value>, ApiError> {
    let mut body = serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Response serialization failed");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    })?;
    if let Value::Object(map) = &mut body {
        map.insert("ok".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}

fn device_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(DEVICE_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Query parameters for `/device/config`.
#[derive(Debug, Deserialize)]
pub struct DeviceConfigParams {
    pub device_id: Option<String>,
}

/// Query parameters for `/admin/events`. `limit` stays a raw string so
/// non-integer values get the documented 400 instead of a rejected extractor.
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<String>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ingest/frame", post(ingest_frame_handler))
        .route("/ingest/heartbeat", post(heartbeat_handler))
        .route("/device/config", get(device_config_handler))
        .route("/admin/events", get(admin_events_handler))
        .route("/admin/devices", get(admin_devices_handler))
        .route("/admin/metrics/{group}", get(admin_metrics_handler))
        .fallback(not_found_handler)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn health_handler() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Frame ingestion endpoint.
async fn ingest_frame_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let accepted = state
        .gateway
        .ingest_frame(device_key(&headers), &body, started)?;
    Ok(Json(json!({
        "ok": true,
        "frame_id": accepted.frame_id,
        "received_ts": accepted.received_ts,
    })))
}

/// Heartbeat endpoint.
async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let accepted = state.gateway.heartbeat(device_key(&headers), &body)?;
    Ok(Json(json!({ "ok": true, "last_seen": accepted.last_seen })))
}

/// Effective capture config for one device.
async fn device_config_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeviceConfigParams>,
) -> Result<Json<Value>, ApiError> {
    let device_id = params
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("device_id query param required"))?;

    let config = state.gateway.device_config(&device_id)?;
    Ok(Json(json!({
        "ok": true,
        "device_id": device_id,
        "config": config,
    })))
}

/// Most recent events, newest first.
async fn admin_events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = match params.limit {
        None => DEFAULT_EVENTS_LIMIT,
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ApiError::bad_request("limit must be an integer"))?,
    };
    if limit < 1 {
        return Err(ApiError::bad_request("limit must be positive"));
    }

    let events = state.store.recent_events(limit)?;
    Ok(Json(json!({ "ok": true, "events": events })))
}

/// All known devices with their latest telemetry.
async fn admin_devices_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let devices = state.store.list_devices()?;
    Ok(Json(json!({ "ok": true, "devices": devices })))
}

/// One metrics group, computed on demand.
async fn admin_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match group.as_str() {
        "ingest" => ok_envelope(&state.metrics.ingest()?),
        "queue" => ok_envelope(&state.metrics.queue()?),
        "database" => ok_envelope(&state.metrics.database()?),
        "system" => ok_envelope(&state.metrics.system()),
        _ => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "unknown metrics group".to_string(),
        }),
    }
}

/// Catch-all for unrecognized paths.
async fn not_found_handler() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "not found".to_string(),
    }
}
