//! Read-only sync status aggregation for the UI layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app_state::{AppStateStore, LAST_SYNC_COMPLETED_AT};
use crate::errors::StorageError;
use crate::evidence::EvidenceRepository;
use crate::storage::{IndexField, RecordFilter, SharedBackend, StoreTable};
use crate::sync::{EntityKind, QueueCounts, SyncQueueItem, SyncQueueRepository, SyncStatus};

/// Per-entity-type counters. `failed` counts exhausted queue items, not a
/// record status; a record whose item failed still reads `pending` locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCounts {
    pub pending: i64,
    pub conflict: i64,
    pub failed: i64,
}

/// One aggregate the UI polls for badges and the sync screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub properties: EntityCounts,
    pub inspections: EntityCounts,
    pub evidence: EntityCounts,
    pub queue: QueueCounts,
    pub media_pending_uploads: i64,
    pub media_failed_uploads: i64,
    pub last_synced_at: Option<String>,
}

/// Pure reads over the backend and queue; taking a snapshot never writes and
/// never triggers a drain.
pub struct SyncStatsReader {
    backend: SharedBackend,
    queue: Arc<SyncQueueRepository>,
    evidence: Arc<EvidenceRepository>,
    app_state: Arc<AppStateStore>,
}

impl SyncStatsReader {
    pub fn new(
        backend: SharedBackend,
        queue: Arc<SyncQueueRepository>,
        evidence: Arc<EvidenceRepository>,
        app_state: Arc<AppStateStore>,
    ) -> Self {
        Self {
            backend,
            queue,
            evidence,
            app_state,
        }
    }

    pub async fn snapshot(&self) -> Result<SyncStats, StorageError> {
        let failed_items = self.queue.list_failed().await?;
        let properties = self
            .entity_counts(StoreTable::Properties, EntityKind::Property, &failed_items)
            .await?;
        let inspections = self
            .entity_counts(
                StoreTable::Inspections,
                EntityKind::Inspection,
                &failed_items,
            )
            .await?;
        let evidence = self
            .entity_counts(StoreTable::Evidence, EntityKind::Evidence, &failed_items)
            .await?;
        let queue = self.queue.counts().await?;
        let media_pending_uploads = self.evidence.list_pending_uploads().await?.len() as i64;
        let media_failed_uploads = self.evidence.list_failed_uploads().await?.len() as i64;
        let last_synced_at = self.app_state.get(LAST_SYNC_COMPLETED_AT).await?;
        Ok(SyncStats {
            properties,
            inspections,
            evidence,
            queue,
            media_pending_uploads,
            media_failed_uploads,
            last_synced_at,
        })
    }

    async fn entity_counts(
        &self,
        table: StoreTable,
        kind: EntityKind,
        failed_items: &[SyncQueueItem],
    ) -> Result<EntityCounts, StorageError> {
        let pending = self
            .backend
            .count(
                table,
                RecordFilter::by(IndexField::SyncStatus, SyncStatus::Pending.as_str()),
            )
            .await?;
        // Evidence records have no conflict state; this count stays zero
        // there by construction.
        let conflict = self
            .backend
            .count(
                table,
                RecordFilter::by(IndexField::SyncStatus, SyncStatus::Conflict.as_str()),
            )
            .await?;
        let failed = failed_items
            .iter()
            .filter(|item| item.entity_type == kind)
            .count() as i64;
        Ok(EntityCounts {
            pending,
            conflict,
            failed,
        })
    }
}
