//! Storage layer.
//!
//! SQLite behind an r2d2 connection pool. The pool is the only shared mutable
//! resource in the system: request handlers, the worker, and the metrics
//! aggregator all go through [`Store`], checking a connection out per
//! operation and releasing it on every exit path.
//!
//! # Components
//!
//! - [`Store`]: the facade every component reads and writes through
//! - [`StorePool`]: pooled connections with WAL mode and a busy timeout
//! - [`StorageError`]: layer-wide error type
//! - `schema`: DDL and initialization
//! - `types`: row types shared across the crate

mod error;
mod pool;
pub mod schema;
pub(crate) mod store;
pub mod types;

pub use error::StorageError;
pub use pool::StorePool;
pub use store::{FrameInsert, Store, TableActivity};
pub use types::{
    now_iso, parse_iso, Capture, ClaimedJob, Device, DeviceConfig, DeviceConfigOverride,
    DeviceTelemetry, EventView, IngestAuditRecord, Job, JobStatus, NewCapture, NewEvent,
    ProcessingStatus,
};
