//! Bridges diesel-level faults into the core storage error.

use fieldbook_core::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("connection: {0}")]
    Connection(#[from] diesel::result::ConnectionError),

    #[error("database file: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("migrations: {0}")]
    Migration(String),
}

impl From<DriverError> for StorageError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Storage(inner) => inner,
            other => StorageError::backend(other.to_string()),
        }
    }
}
