//! Durable sync queue: an append-only, FIFO-drained log of pending mutations.

use chrono::Utc;
use log::{info, warn};
use serde_json::Value;

use crate::errors::StorageError;
use crate::storage::{IndexField, RecordFilter, RecordWrite, SharedBackend, StoreTable};
use crate::sync::{EntityKind, QueueCounts, QueueStatus, SyncQueueItem, MAX_SYNC_ATTEMPTS};

/// Stored error messages are capped so one huge response body cannot bloat
/// the queue table.
const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// Build the batch element a repository pairs with its entity write so both
/// commit together.
pub fn enqueue_write(item: &SyncQueueItem) -> Result<RecordWrite, StorageError> {
    Ok(RecordWrite::new(
        StoreTable::SyncQueue,
        &item.id,
        serde_json::to_value(item)?,
    ))
}

pub struct SyncQueueRepository {
    backend: SharedBackend,
}

impl SyncQueueRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Append a standalone item (reconciliation path; repositories enqueue
    /// through `enqueue_write` batches instead).
    pub async fn enqueue(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        self.backend.put_all(vec![enqueue_write(item)?]).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueItem>, StorageError> {
        let Some(record) = self.backend.get(StoreTable::SyncQueue, id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(record)?))
    }

    /// All items in FIFO order, completed ones included (the log is kept for
    /// audit).
    pub async fn list_all(&self) -> Result<Vec<SyncQueueItem>, StorageError> {
        let records = self
            .backend
            .query(StoreTable::SyncQueue, RecordFilter::All)
            .await?;
        let mut items = records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<SyncQueueItem>, _>>()?;
        sort_fifo(&mut items);
        Ok(items)
    }

    /// Items eligible for the next drain pass, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<SyncQueueItem>, StorageError> {
        self.list_by_status(QueueStatus::Pending).await
    }

    /// Items past the attempt threshold, excluded from automatic drains.
    pub async fn list_failed(&self) -> Result<Vec<SyncQueueItem>, StorageError> {
        self.list_by_status(QueueStatus::Failed).await
    }

    pub async fn mark_processing(&self, id: &str) -> Result<(), StorageError> {
        let mut item = self.require(id).await?;
        item.status = QueueStatus::Processing;
        self.put_item(&item).await
    }

    /// Completion leaves the item in the log rather than deleting it.
    pub async fn mark_completed(&self, id: &str) -> Result<(), StorageError> {
        let mut item = self.require(id).await?;
        item.status = QueueStatus::Completed;
        item.error_message = None;
        self.put_item(&item).await
    }

    /// Record one failed attempt and apply the threshold rule. Returns the
    /// status the item ended up in.
    pub async fn mark_failed_attempt(
        &self,
        id: &str,
        error: &str,
    ) -> Result<QueueStatus, StorageError> {
        let mut item = self.require(id).await?;
        item.attempts += 1;
        item.last_attempt_at = Some(Utc::now().to_rfc3339());
        item.error_message = Some(error.chars().take(ERROR_MESSAGE_MAX_CHARS).collect());
        item.status = if item.attempts >= MAX_SYNC_ATTEMPTS {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        };
        if item.status == QueueStatus::Failed {
            warn!(
                "Sync item {} ({} {} {}) failed permanently after {} attempts: {}",
                item.id,
                item.action.as_str(),
                item.entity_type.as_str(),
                item.entity_id,
                item.attempts,
                error
            );
        }
        self.put_item(&item).await?;
        Ok(item.status)
    }

    /// Manual "retry failed" action: failed items return to `pending` with
    /// their attempt counter reset to 0, and the entities they reference are
    /// re-stamped `pending`. Items whose entity row no longer exists (deleted
    /// after the item failed) are completed instead, never re-sent.
    pub async fn retry_failed(&self) -> Result<usize, StorageError> {
        let failed = self.list_by_status(QueueStatus::Failed).await?;
        if failed.is_empty() {
            return Ok(0);
        }
        let mut writes = Vec::new();
        let mut requeued = 0usize;
        for mut item in failed {
            let table = item.entity_type.table();
            match self.backend.get(table, &item.entity_id).await? {
                Some(mut record) => {
                    item.attempts = 0;
                    item.error_message = None;
                    item.status = QueueStatus::Pending;
                    requeued += 1;
                    if let Some(fields) = record.as_object_mut() {
                        fields.insert(
                            IndexField::SyncStatus.record_key().to_string(),
                            Value::String("pending".to_string()),
                        );
                    }
                    writes.push(RecordWrite::new(table, &item.entity_id, record));
                    writes.push(enqueue_write(&item)?);
                }
                None => {
                    item.status = QueueStatus::Completed;
                    item.error_message = None;
                    writes.push(enqueue_write(&item)?);
                }
            }
        }
        self.backend.put_all(writes).await?;
        info!("Requeued {} failed sync item(s) for retry", requeued);
        Ok(requeued)
    }

    /// Demote items stranded in `processing` by a previous run back to
    /// `pending` so they are re-sent (remote calls are idempotent by local id).
    pub async fn demote_stale_processing(&self) -> Result<usize, StorageError> {
        let stale = self.list_by_status(QueueStatus::Processing).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        let count = stale.len();
        let writes = stale
            .into_iter()
            .map(|mut item| {
                item.status = QueueStatus::Pending;
                enqueue_write(&item)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.put_all(writes).await?;
        Ok(count)
    }

    /// True when any non-completed item references the entity. Drives the
    /// pending-iff-open-item invariant.
    pub async fn has_open_items_for(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<bool, StorageError> {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Failed,
        ] {
            let items = self.list_by_status(status).await?;
            if items
                .iter()
                .any(|item| item.entity_type == entity_type && item.entity_id == entity_id)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn counts(&self) -> Result<QueueCounts, StorageError> {
        Ok(QueueCounts {
            pending: self.count_status(QueueStatus::Pending).await?,
            processing: self.count_status(QueueStatus::Processing).await?,
            completed: self.count_status(QueueStatus::Completed).await?,
            failed: self.count_status(QueueStatus::Failed).await?,
        })
    }

    async fn list_by_status(
        &self,
        status: QueueStatus,
    ) -> Result<Vec<SyncQueueItem>, StorageError> {
        let records = self
            .backend
            .query(
                StoreTable::SyncQueue,
                RecordFilter::by(IndexField::QueueStatus, status.as_str()),
            )
            .await?;
        let mut items = records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<SyncQueueItem>, _>>()?;
        sort_fifo(&mut items);
        Ok(items)
    }

    async fn count_status(&self, status: QueueStatus) -> Result<i64, StorageError> {
        self.backend
            .count(
                StoreTable::SyncQueue,
                RecordFilter::by(IndexField::QueueStatus, status.as_str()),
            )
            .await
    }

    async fn require(&self, id: &str) -> Result<SyncQueueItem, StorageError> {
        self.get(id)
            .await?
            .ok_or_else(|| StorageError::not_found(StoreTable::SyncQueue, id))
    }

    async fn put_item(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        self.backend
            .put(StoreTable::SyncQueue, &item.id, serde_json::to_value(item)?)
            .await
    }
}

/// FIFO is createdAt with id as tie-break; ids are time-ordered v7 so ties
/// within one timestamp still resolve to creation order.
fn sort_fifo(items: &mut [SyncQueueItem]) {
    items.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
