//! Audit and metrics aggregation.
//!
//! Everything here is computed on demand from the store; nothing is maintained
//! incrementally. The ingest group windows over the trailing hour of audit
//! rows; the database group's per-table size is a documented approximation
//! (file size divided evenly across rows, scaled per table).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::probe::{self, HostMetrics};
use crate::storage::{parse_iso, JobStatus, StorageError, Store};

/// Length of the trailing metrics window, in minutes.
pub const INGEST_WINDOW_MINUTES: i64 = 60;

/// Number of histogram buckets covering the window.
pub const INGEST_BUCKET_COUNT: usize = 12;

/// Width of one histogram bucket, in minutes.
pub const INGEST_BUCKET_MINUTES: i64 = 5;

/// Windowed and all-time ingest statistics.
#[derive(Debug, Clone, Serialize)]
pub struct IngestMetrics {
    pub success_total: u64,
    pub failure_total: u64,
    pub success_60m: u64,
    pub failure_60m: u64,
    pub avg_latency_ms: f64,
    /// Attempt counts per 5-minute bucket, oldest first.
    pub series: Vec<u64>,
}

/// Job queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    /// Per-status job counts (absent statuses omitted).
    pub queue: BTreeMap<String, i64>,
    /// queued + running + failed + dead.
    pub depth: i64,
}

/// Per-table storage detail.
#[derive(Debug, Clone, Serialize)]
pub struct TableDetail {
    pub name: String,
    pub rows: i64,
    #[serde(rename = "lastWrite")]
    pub last_write: String,
    /// Approximate footprint, formatted "X.XX MB".
    pub size: String,
}

/// Database statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseMetrics {
    pub connected: bool,
    pub version: String,
    #[serde(rename = "dbSizeMb")]
    pub db_size_mb: f64,
    pub captures: i64,
    pub events: i64,
    pub jobs: i64,
    pub devices: i64,
    #[serde(rename = "ingestAudit")]
    pub ingest_audit: i64,
    pub tables: Vec<TableDetail>,
}

/// On-demand aggregator over the audit log, job table, and store files.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Store,
    data_dir: PathBuf,
}

impl MetricsAggregator {
    pub fn new(store: Store, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
        }
    }

    /// Ingest statistics anchored at the current instant.
    pub fn ingest(&self) -> Result<IngestMetrics, StorageError> {
        self.ingest_at(Utc::now())
    }

    /// Ingest statistics anchored at `now` (injectable for tests).
    ///
    /// Rows outside the trailing window, or with unparsable timestamps, are
    /// excluded from windowed figures but still counted in all-time totals.
    pub fn ingest_at(&self, now: DateTime<Utc>) -> Result<IngestMetrics, StorageError> {
        let window_start = now - Duration::minutes(INGEST_WINDOW_MINUTES);
        let bucket_start =
            now - Duration::minutes(INGEST_BUCKET_MINUTES * INGEST_BUCKET_COUNT as i64);
        let bucket_seconds = INGEST_BUCKET_MINUTES * 60;

        let mut metrics = IngestMetrics {
            success_total: 0,
            failure_total: 0,
            success_60m: 0,
            failure_60m: 0,
            avg_latency_ms: 0.0,
            series: vec![0; INGEST_BUCKET_COUNT],
        };
        let mut latency_sum: i64 = 0;
        let mut latency_samples: u64 = 0;

        for record in self.store.audit_records()? {
            if record.ok {
                metrics.success_total += 1;
            } else {
                metrics.failure_total += 1;
            }

            let Some(ts) = parse_iso(&record.request_ts) else {
                continue;
            };

            if ts >= window_start && ts <= now {
                if record.ok {
                    metrics.success_60m += 1;
                } else {
                    metrics.failure_60m += 1;
                }
                latency_sum += record.latency_ms;
                latency_samples += 1;
            }

            if ts >= bucket_start {
                let index = (ts - bucket_start).num_seconds() / bucket_seconds;
                if (0..INGEST_BUCKET_COUNT as i64).contains(&index) {
                    metrics.series[index as usize] += 1;
                }
            }
        }

        if latency_samples > 0 {
            let avg = latency_sum as f64 / latency_samples as f64;
            metrics.avg_latency_ms = (avg * 10.0).round() / 10.0;
        }

        Ok(metrics)
    }

    /// Current queue shape.
    pub fn queue(&self) -> Result<QueueMetrics, StorageError> {
        let queue = self.store.job_status_counts()?;
        let depth = JobStatus::DEPTH_STATUSES
            .iter()
            .map(|s| queue.get(s.as_ref()).copied().unwrap_or(0))
            .sum();
        Ok(QueueMetrics { queue, depth })
    }

    /// Database shape and approximate per-table footprints.
    pub fn database(&self) -> Result<DatabaseMetrics, StorageError> {
        let activity = self.store.table_activity()?;
        let total_rows: i64 = activity.iter().map(|t| t.rows).sum();
        let db_size = self.store.db_file_size() as f64;
        let approx_per_row = if total_rows > 0 {
            db_size / total_rows as f64
        } else {
            0.0
        };

        let count_of = |name: &str| {
            activity
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.rows)
                .unwrap_or(0)
        };

        let tables = activity
            .iter()
            .map(|t| {
                let size_mb = (approx_per_row * t.rows as f64) / 1_048_576.0;
                TableDetail {
                    name: t.name.to_string(),
                    rows: t.rows,
                    last_write: t.last_write.clone().unwrap_or_else(|| "N/A".to_string()),
                    size: format!("{size_mb:.2} MB"),
                }
            })
            .collect();

        Ok(DatabaseMetrics {
            connected: true,
            version: self.store.engine_version().to_string(),
            db_size_mb: (db_size / 1_048_576.0 * 100.0).round() / 100.0,
            captures: count_of("captures"),
            events: count_of("events"),
            jobs: count_of("jobs"),
            devices: count_of("devices"),
            ingest_audit: count_of("ingest_audit"),
            tables,
        })
    }

    /// Best-effort host resource figures (external collaborator).
    pub fn system(&self) -> HostMetrics {
        probe::collect(&self.data_dir)
    }
}
