//! Storage port: one record-level interface, several physical engines.
//!
//! Repositories and the sync engine speak only this interface; which engine
//! actually holds the data (embedded SQLite, the key-value fallback, or the
//! in-memory test double) is decided once at initialization and never
//! branched on again.

mod memory;
mod unavailable;

pub use memory::MemoryBackend;
pub use unavailable::UnavailableBackend;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StorageError;

/// Logical tables persisted by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTable {
    Properties,
    Inspections,
    Evidence,
    SyncQueue,
    AppState,
}

impl StoreTable {
    pub const ALL: [StoreTable; 5] = [
        StoreTable::Properties,
        StoreTable::Inspections,
        StoreTable::Evidence,
        StoreTable::SyncQueue,
        StoreTable::AppState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreTable::Properties => "properties",
            StoreTable::Inspections => "inspections",
            StoreTable::Evidence => "evidence",
            StoreTable::SyncQueue => "sync_queue",
            StoreTable::AppState => "app_state",
        }
    }
}

impl fmt::Display for StoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared secondary indices. Filters may only target these fields, which
/// keeps every engine able to serve them cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexField {
    /// `syncStatus` on properties, inspections, and evidence.
    SyncStatus,
    /// `propertyId` on inspections.
    PropertyId,
    /// `inspectionId` on evidence.
    InspectionId,
    /// `status` on sync_queue.
    QueueStatus,
}

impl IndexField {
    /// Record key the field matches against.
    pub fn record_key(&self) -> &'static str {
        match self {
            IndexField::SyncStatus => "syncStatus",
            IndexField::PropertyId => "propertyId",
            IndexField::InspectionId => "inspectionId",
            IndexField::QueueStatus => "status",
        }
    }

    /// Table the index is declared on.
    pub fn table(&self) -> StoreTable {
        match self {
            IndexField::SyncStatus => StoreTable::Properties,
            IndexField::PropertyId => StoreTable::Inspections,
            IndexField::InspectionId => StoreTable::Evidence,
            IndexField::QueueStatus => StoreTable::SyncQueue,
        }
    }

    /// Whether the index is declared for `table`. `SyncStatus` exists on all
    /// three syncable tables; the others are single-table.
    pub fn applies_to(&self, table: StoreTable) -> bool {
        match self {
            IndexField::SyncStatus => matches!(
                table,
                StoreTable::Properties | StoreTable::Inspections | StoreTable::Evidence
            ),
            _ => self.table() == table,
        }
    }
}

/// Record selection for `query`/`count`.
#[derive(Debug, Clone)]
pub enum RecordFilter {
    All,
    /// Equality match against one declared secondary index.
    Index { field: IndexField, value: String },
}

impl RecordFilter {
    pub fn by(field: IndexField, value: impl Into<String>) -> Self {
        Self::Index {
            field,
            value: value.into(),
        }
    }
}

/// One keyed record write, used to batch multi-table commits.
#[derive(Debug, Clone)]
pub struct RecordWrite {
    pub table: StoreTable,
    pub id: String,
    pub record: Value,
}

impl RecordWrite {
    pub fn new(table: StoreTable, id: impl Into<String>, record: Value) -> Self {
        Self {
            table,
            id: id.into(),
            record,
        }
    }
}

/// Which physical engine backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Kv,
    Memory,
    Unavailable,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Kv => "kv",
            BackendKind::Memory => "memory",
            BackendKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform key/record interface over the physical engines.
///
/// Records are the camelCase JSON serialization of the domain structs; `id`
/// always mirrors the record's `"id"`/`"key"` field. `query` and `count`
/// return/consider records in ascending primary-key order, which for the
/// sync queue (time-ordered v7 ids) is creation order.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Upsert a single record.
    async fn put(&self, table: StoreTable, id: &str, record: Value) -> Result<(), StorageError> {
        self.put_all(vec![RecordWrite::new(table, id, record)]).await
    }

    /// Commit a batch of record writes.
    ///
    /// Engines with multi-table transactions apply the batch atomically.
    /// Engines without them apply writes sequentially in batch order; callers
    /// order entity writes before their queue writes so the startup
    /// reconciliation pass can repair a crash between the two.
    async fn put_all(&self, writes: Vec<RecordWrite>) -> Result<(), StorageError>;

    async fn get(&self, table: StoreTable, id: &str) -> Result<Option<Value>, StorageError>;

    async fn query(
        &self,
        table: StoreTable,
        filter: RecordFilter,
    ) -> Result<Vec<Value>, StorageError>;

    async fn count(&self, table: StoreTable, filter: RecordFilter) -> Result<i64, StorageError>;

    /// Remove a record. Removing an absent id is a no-op.
    async fn remove(&self, table: StoreTable, id: &str) -> Result<(), StorageError>;

    /// Flush and release the engine.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Shared handle to the process-lifetime backend instance.
pub type SharedBackend = Arc<dyn StorageBackend>;

/// Validate a filter against the declared indices before an engine sees it.
pub fn check_filter(table: StoreTable, filter: &RecordFilter) -> Result<(), StorageError> {
    if let RecordFilter::Index { field, .. } = filter {
        if !field.applies_to(table) {
            return Err(StorageError::backend(format!(
                "index {} is not declared on table {}",
                field.record_key(),
                table
            )));
        }
    }
    Ok(())
}

/// Read a record's string field, tolerating absent keys.
pub fn record_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// True when the record's `key` equals `value` (index-field comparison).
pub fn record_matches(record: &Value, key: &str, value: &str) -> bool {
    record_str(record, key) == Some(value)
}
