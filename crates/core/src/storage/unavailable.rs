//! Degraded backend used when no offline-capable engine could be opened.
//! Every call fails fast so repositories surface the condition immediately
//! instead of silently losing writes.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StorageError;
use crate::storage::{BackendKind, RecordFilter, RecordWrite, StorageBackend, StoreTable};

#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl UnavailableBackend {
    pub fn new() -> Self {
        Self
    }

    fn fail<T>() -> Result<T, StorageError> {
        Err(StorageError::unavailable(
            "no offline storage engine could be opened; use the online path",
        ))
    }
}

#[async_trait]
impl StorageBackend for UnavailableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Unavailable
    }

    async fn put_all(&self, _writes: Vec<RecordWrite>) -> Result<(), StorageError> {
        Self::fail()
    }

    async fn get(&self, _table: StoreTable, _id: &str) -> Result<Option<Value>, StorageError> {
        Self::fail()
    }

    async fn query(
        &self,
        _table: StoreTable,
        _filter: RecordFilter,
    ) -> Result<Vec<Value>, StorageError> {
        Self::fail()
    }

    async fn count(&self, _table: StoreTable, _filter: RecordFilter) -> Result<i64, StorageError> {
        Self::fail()
    }

    async fn remove(&self, _table: StoreTable, _id: &str) -> Result<(), StorageError> {
        Self::fail()
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_fails_fast() {
        let backend = UnavailableBackend::new();
        assert!(matches!(
            backend.get(StoreTable::Properties, "p-1").await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(
            backend
                .put(StoreTable::Properties, "p-1", serde_json::json!({}))
                .await,
            Err(StorageError::Unavailable(_))
        ));
        // Close stays infallible on the degraded path.
        assert!(backend.close().await.is_ok());
    }
}
