//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (bind address, port)
//! - Database settings (path, pool size)
//! - Ingest settings (device credential, staging directory)
//! - Worker and retention scheduling
//! - Global device config defaults

mod app;
mod validation;

pub use app::{
    AppConfig, DatabaseConfig, DeviceDefaults, IngestConfig, RetentionConfig, ServerConfig,
    WorkerConfig,
};
pub use validation::ConfigError;

// Re-export constants
pub use app::{DEFAULT_POLL_INTERVAL, DEFAULT_POOL_SIZE, DEFAULT_RETENTION_DAYS};
