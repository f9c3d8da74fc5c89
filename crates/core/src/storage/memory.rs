//! In-memory backend. Reference semantics for the port and the test double
//! used by repository and engine tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StorageError;
use crate::storage::{
    check_filter, record_matches, BackendKind, RecordFilter, RecordWrite, StorageBackend,
    StoreTable,
};

/// `BTreeMap` per table behind one lock; batch writes are naturally atomic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<StoreTable, BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> StorageError {
        StorageError::backend("memory backend lock is poisoned")
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put_all(&self, writes: Vec<RecordWrite>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| Self::lock_err())?;
        for write in writes {
            tables
                .entry(write.table)
                .or_default()
                .insert(write.id, write.record);
        }
        Ok(())
    }

    async fn get(&self, table: StoreTable, id: &str) -> Result<Option<Value>, StorageError> {
        let tables = self.tables.read().map_err(|_| Self::lock_err())?;
        Ok(tables.get(&table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn query(
        &self,
        table: StoreTable,
        filter: RecordFilter,
    ) -> Result<Vec<Value>, StorageError> {
        check_filter(table, &filter)?;
        let tables = self.tables.read().map_err(|_| Self::lock_err())?;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        // BTreeMap iteration gives ascending-id order.
        let records = rows
            .values()
            .filter(|record| match &filter {
                RecordFilter::All => true,
                RecordFilter::Index { field, value } => {
                    record_matches(record, field.record_key(), value)
                }
            })
            .cloned()
            .collect();
        Ok(records)
    }

    async fn count(&self, table: StoreTable, filter: RecordFilter) -> Result<i64, StorageError> {
        Ok(self.query(table, filter).await?.len() as i64)
    }

    async fn remove(&self, table: StoreTable, id: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| Self::lock_err())?;
        if let Some(rows) = tables.get_mut(&table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexField;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .put(
                StoreTable::Properties,
                "p-1",
                json!({"id": "p-1", "syncStatus": "pending"}),
            )
            .await
            .unwrap();

        let record = backend.get(StoreTable::Properties, "p-1").await.unwrap();
        assert_eq!(record.unwrap()["syncStatus"], "pending");
        assert!(backend
            .get(StoreTable::Properties, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn query_filters_on_indexed_field() {
        let backend = MemoryBackend::new();
        backend
            .put_all(vec![
                RecordWrite::new(
                    StoreTable::Evidence,
                    "e-1",
                    json!({"id": "e-1", "inspectionId": "i-1", "syncStatus": "pending"}),
                ),
                RecordWrite::new(
                    StoreTable::Evidence,
                    "e-2",
                    json!({"id": "e-2", "inspectionId": "i-2", "syncStatus": "pending"}),
                ),
                RecordWrite::new(
                    StoreTable::Evidence,
                    "e-3",
                    json!({"id": "e-3", "inspectionId": "i-1", "syncStatus": "synced"}),
                ),
            ])
            .await
            .unwrap();

        let for_inspection = backend
            .query(
                StoreTable::Evidence,
                RecordFilter::by(IndexField::InspectionId, "i-1"),
            )
            .await
            .unwrap();
        assert_eq!(for_inspection.len(), 2);

        let pending = backend
            .count(
                StoreTable::Evidence,
                RecordFilter::by(IndexField::SyncStatus, "pending"),
            )
            .await
            .unwrap();
        assert_eq!(pending, 2);
    }

    #[tokio::test]
    async fn query_returns_records_in_id_order() {
        let backend = MemoryBackend::new();
        for id in ["c", "a", "b"] {
            backend
                .put(StoreTable::SyncQueue, id, json!({"id": id, "status": "pending"}))
                .await
                .unwrap();
        }

        let ids: Vec<String> = backend
            .query(StoreTable::SyncQueue, RecordFilter::All)
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let backend = MemoryBackend::new();
        backend
            .put(StoreTable::AppState, "k", json!({"key": "k", "value": "v"}))
            .await
            .unwrap();

        backend.remove(StoreTable::AppState, "k").await.unwrap();
        backend.remove(StoreTable::AppState, "k").await.unwrap();
        assert!(backend
            .get(StoreTable::AppState, "k")
            .await
            .unwrap()
            .is_none());
    }
}
