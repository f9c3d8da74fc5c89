//! Small persisted key/value area for cross-session flags. Not a sync
//! target: writes here never enqueue anything.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::storage::{SharedBackend, StoreTable};

/// Stamped by the engine after every finished drain.
pub const LAST_SYNC_COMPLETED_AT: &str = "last_sync_completed_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

pub struct AppStateStore {
    backend: SharedBackend,
}

impl AppStateStore {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(record) = self.backend.get(StoreTable::AppState, key).await? else {
            return Ok(None);
        };
        let entry: AppStateEntry = serde_json::from_value(record)?;
        Ok(Some(entry.value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = AppStateEntry {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        };
        self.backend
            .put(StoreTable::AppState, key, serde_json::to_value(&entry)?)
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(StoreTable::AppState, key).await
    }
}
