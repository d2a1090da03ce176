//! Connection pool using r2d2.
//!
//! Every component checks a connection out for the duration of one operation
//! and releases it on every exit path via RAII. WAL mode plus a busy timeout
//! lets the request handlers and the worker share the file safely.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::storage::StorageError;

/// Busy timeout applied to every pooled connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite connection pool.
pub struct StorePool {
    pool: Pool<SqliteConnectionManager>,
}

impl StorePool {
    /// Create a new pool for the given database file.
    ///
    /// Note: schema is expected to be initialized by [`Store::open`] before
    /// other components query through this pool.
    ///
    /// [`Store::open`]: crate::storage::Store::open
    pub fn new(db_path: &Path, size: u32) -> Result<Arc<Self>, StorageError> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });
        let pool = Pool::builder().max_size(size).build(manager)?;

        Ok(Arc::new(Self { pool }))
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }
}
