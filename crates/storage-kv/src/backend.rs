//! Key-value realization of the storage port, used where the embedded
//! relational engine is unavailable.
//!
//! One sled tree per logical table, JSON document as the value, record id as
//! the key. Sled iterates keys in byte order, which gives the port's
//! ascending-id ordering for free. There is no multi-tree transaction here:
//! `put_all` applies writes sequentially in batch order, and the startup
//! reconciliation pass repairs the entity-written/item-missing window a
//! crash can leave behind.

use std::path::Path;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use fieldbook_core::storage::{
    check_filter, record_matches, BackendKind, RecordFilter, RecordWrite, StorageBackend,
    StoreTable,
};
use fieldbook_core::StorageError;

const KV_DIR_NAME: &str = "fieldbook-kv";

fn store_err(err: sled::Error) -> StorageError {
    StorageError::backend(format!("kv store: {err}"))
}

pub struct KvBackend {
    db: sled::Db,
    properties: sled::Tree,
    inspections: sled::Tree,
    evidence: sled::Tree,
    sync_queue: sled::Tree,
    app_state: sled::Tree,
}

impl KvBackend {
    /// Open (creating if needed) the store under `app_data_dir`.
    pub fn open(app_data_dir: &str) -> Result<Self, StorageError> {
        let config = sled::Config::new()
            .path(Path::new(app_data_dir).join(KV_DIR_NAME))
            .mode(sled::Mode::HighThroughput)
            .flush_every_ms(Some(1000));
        let db = config.open().map_err(store_err)?;
        let backend = Self {
            properties: open_tree(&db, StoreTable::Properties)?,
            inspections: open_tree(&db, StoreTable::Inspections)?,
            evidence: open_tree(&db, StoreTable::Evidence)?,
            sync_queue: open_tree(&db, StoreTable::SyncQueue)?,
            app_state: open_tree(&db, StoreTable::AppState)?,
            db,
        };
        backend.db.flush().map_err(store_err)?;
        debug!("KV store ready under {}", app_data_dir);
        Ok(backend)
    }

    fn tree(&self, table: StoreTable) -> &sled::Tree {
        match table {
            StoreTable::Properties => &self.properties,
            StoreTable::Inspections => &self.inspections,
            StoreTable::Evidence => &self.evidence,
            StoreTable::SyncQueue => &self.sync_queue,
            StoreTable::AppState => &self.app_state,
        }
    }
}

fn open_tree(db: &sled::Db, table: StoreTable) -> Result<sled::Tree, StorageError> {
    db.open_tree(table.as_str()).map_err(store_err)
}

fn parse_record(bytes: &[u8]) -> Result<Value, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl StorageBackend for KvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kv
    }

    async fn put_all(&self, writes: Vec<RecordWrite>) -> Result<(), StorageError> {
        for write in &writes {
            let bytes = serde_json::to_vec(&write.record)?;
            self.tree(write.table)
                .insert(write.id.as_bytes(), bytes)
                .map_err(store_err)?;
        }
        self.db.flush_async().await.map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, table: StoreTable, id: &str) -> Result<Option<Value>, StorageError> {
        let bytes = self.tree(table).get(id.as_bytes()).map_err(store_err)?;
        bytes.map(|bytes| parse_record(&bytes)).transpose()
    }

    async fn query(
        &self,
        table: StoreTable,
        filter: RecordFilter,
    ) -> Result<Vec<Value>, StorageError> {
        check_filter(table, &filter)?;
        let mut records = Vec::new();
        for entry in self.tree(table).iter() {
            let (_, bytes) = entry.map_err(store_err)?;
            let record = parse_record(&bytes)?;
            let keep = match &filter {
                RecordFilter::All => true,
                RecordFilter::Index { field, value } => {
                    record_matches(&record, field.record_key(), value)
                }
            };
            if keep {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn count(&self, table: StoreTable, filter: RecordFilter) -> Result<i64, StorageError> {
        check_filter(table, &filter)?;
        match filter {
            RecordFilter::All => Ok(self.tree(table).len() as i64),
            filter => Ok(self.query(table, filter).await?.len() as i64),
        }
    }

    async fn remove(&self, table: StoreTable, id: &str) -> Result<(), StorageError> {
        self.tree(table).remove(id.as_bytes()).map_err(store_err)?;
        self.db.flush_async().await.map_err(store_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.db.flush_async().await.map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbook_core::storage::IndexField;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup_backend() -> (tempfile::TempDir, KvBackend) {
        let dir = tempdir().expect("tempdir");
        let backend = KvBackend::open(&dir.path().to_string_lossy()).expect("open kv");
        (dir, backend)
    }

    #[tokio::test]
    async fn put_get_roundtrip_preserves_the_document() {
        let (_dir, backend) = setup_backend();
        let record = json!({
            "id": "p-1",
            "name": "Depot",
            "syncStatus": "pending",
            "buildingInfo": {"floors": 2}
        });
        backend
            .put(StoreTable::Properties, "p-1", record.clone())
            .await
            .unwrap();

        let loaded = backend.get(StoreTable::Properties, "p-1").await.unwrap();
        assert_eq!(loaded, Some(record));
        assert!(backend
            .get(StoreTable::Properties, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn tables_are_isolated_trees() {
        let (_dir, backend) = setup_backend();
        backend
            .put(StoreTable::Properties, "x", json!({"id": "x"}))
            .await
            .unwrap();

        assert!(backend
            .get(StoreTable::Inspections, "x")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            backend
                .count(StoreTable::Inspections, RecordFilter::All)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn query_filters_without_declared_columns() {
        let (_dir, backend) = setup_backend();
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
    async fn query_returns_rows_in_key_order() {
        let (_dir, backend) = setup_backend();
        for id in ["c", "a", "b"] {
            backend
                .put(
                    StoreTable::SyncQueue,
                    id,
                    json!({"id": id, "status": "pending"}),
                )
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
    async fn undeclared_filter_is_rejected() {
        let (_dir, backend) = setup_backend();
        let result = backend
            .query(
                StoreTable::AppState,
                RecordFilter::by(IndexField::SyncStatus, "pending"),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_dir, backend) = setup_backend();
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

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().to_string();
        {
            let backend = KvBackend::open(&path).expect("open");
            backend
                .put(
                    StoreTable::Properties,
                    "p-1",
                    json!({"id": "p-1", "syncStatus": "pending"}),
                )
                .await
                .unwrap();
            backend.close().await.unwrap();
        }

        let reopened = KvBackend::open(&path).expect("reopen");
        let record = reopened.get(StoreTable::Properties, "p-1").await.unwrap();
        assert_eq!(record.unwrap()["syncStatus"], "pending");
    }
}
