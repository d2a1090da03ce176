//! Framedock - Edge Camera Frame Ingestion Backend
//!
//! This crate provides the core functionality of the Framedock backend. It can
//! be used as a library by other Rust projects, or run as a standalone binary
//! with the `framedock` executable.
//!
//! # Architecture
//!
//! - **Ingest**: Validated, deduplicated frame and heartbeat intake from
//!   battery-powered edge cameras
//! - **Storage**: SQLite-based persistence layer (devices, captures, jobs,
//!   events, ingest audit)
//! - **Worker**: Background job queue draining captures through a frame
//!   analyzer
//! - **Metrics**: On-demand ingest, queue, database, and system metric groups
//! - **Retention**: Scheduled pruning of staged frames and dated event
//!   archives

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod probe;
pub mod retention;
pub mod server;
pub mod storage;
pub mod worker;

pub use config::AppConfig;
pub use ingest::IngestGateway;
pub use metrics::MetricsAggregator;
pub use retention::RetentionSweeper;
pub use storage::Store;
pub use worker::{PlaceholderAnalyzer, Worker};
