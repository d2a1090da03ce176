//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{DeviceConfig, DeviceConfigOverride};

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default connection pool size.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Default worker poll interval when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default maximum age of staged frame files.
pub const DEFAULT_STAGING_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Default event archive retention, in calendar days.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Default interval between retention sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_staging_max_age() -> Duration {
    DEFAULT_STAGING_MAX_AGE
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: String,

    /// Connection pool size (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/framedock.db".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

// =============================================================================
// Ingest Configuration
// =============================================================================

/// Ingestion gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Shared device credential expected in the `x-device-key` header.
    pub device_key: String,

    /// Directory holding staged frame images awaiting processing.
    pub staging_dir: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            device_key: "dev-key".to_string(),
            staging_dir: "data/staging".to_string(),
        }
    }
}

// =============================================================================
// Worker Configuration
// =============================================================================

/// Background worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Fixed sleep between polls when no queued job exists (default: 2s).
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Retention sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Directory holding per-device, per-date event archives.
    pub events_dir: String,

    /// Staged files older than this are pruned (default: 24h).
    #[serde(default = "default_staging_max_age", with = "humantime_serde")]
    pub staging_max_age: Duration,

    /// Event archive directories dated on or before now minus this many days
    /// are pruned (default: 7).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval between scheduled sweeps (default: 1h).
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            events_dir: "data/events".to_string(),
            staging_max_age: DEFAULT_STAGING_MAX_AGE,
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

// =============================================================================
// Device Defaults
// =============================================================================

/// Global capture-client defaults, returned by `/device/config` for fields a
/// device has no stored override for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDefaults {
    pub capture_interval_s: i64,
    pub burst_fps: i64,
    pub burst_duration_s: i64,
    pub burst_cooldown_s: i64,
    pub interaction_threshold: f64,
    pub interaction_min_frames: i64,
    pub interaction_end_timeout_s: i64,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            capture_interval_s: 30,
            burst_fps: 2,
            burst_duration_s: 15,
            burst_cooldown_s: 60,
            interaction_threshold: 0.3,
            interaction_min_frames: 3,
            interaction_end_timeout_s: 3,
        }
    }
}

impl DeviceDefaults {
    /// Resolve a device's effective config: stored overrides win per field.
    pub fn resolve(&self, stored: Option<DeviceConfigOverride>) -> DeviceConfig {
        let ov = stored.unwrap_or_default();
        DeviceConfig {
            capture_interval_s: ov.capture_interval_s.unwrap_or(self.capture_interval_s),
            burst_fps: ov.burst_fps.unwrap_or(self.burst_fps),
            burst_duration_s: ov.burst_duration_s.unwrap_or(self.burst_duration_s),
            burst_cooldown_s: ov.burst_cooldown_s.unwrap_or(self.burst_cooldown_s),
            interaction_threshold: ov
                .interaction_threshold
                .unwrap_or(self.interaction_threshold),
            interaction_min_frames: ov
                .interaction_min_frames
                .unwrap_or(self.interaction_min_frames),
            interaction_end_timeout_s: ov
                .interaction_end_timeout_s
                .unwrap_or(self.interaction_end_timeout_s),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Ingestion gateway configuration.
    pub ingest: IngestConfig,

    /// Background worker configuration.
    pub worker: WorkerConfig,

    /// Retention sweeper configuration.
    pub retention: RetentionConfig,

    /// Global device config defaults.
    pub device_defaults: DeviceDefaults,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.pool_size == 0 {
            return Err(ConfigError::Validation(
                "database pool_size must be positive".to_string(),
            ));
        }

        if self.ingest.device_key.is_empty() {
            return Err(ConfigError::Validation(
                "ingest device_key must not be empty".to_string(),
            ));
        }

        if self.worker.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "worker poll_interval must be non-zero".to_string(),
            ));
        }

        if self.retention.sweep_interval.is_zero() {
            return Err(ConfigError::Validation(
                "retention sweep_interval must be non-zero".to_string(),
            ));
        }

        if self.retention.retention_days == 0 {
            return Err(ConfigError::Validation(
                "retention retention_days must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
