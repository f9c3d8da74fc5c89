//! Startup self-healing pass.
//!
//! A `pending` record with no open queue item is an orphan: the KV engine's
//! write-then-enqueue pair can be split by a crash, and a drain interrupted
//! between completing an item and re-stamping its record leaves the same
//! shape behind. Both heal the same way: synthesize the missing item from
//! the record snapshot. Runs once at init, before the first drain.

use log::{debug, warn};
use serde_json::Value;

use crate::errors::StorageError;
use crate::storage::{IndexField, RecordFilter, SharedBackend};
use crate::sync::{EntityKind, SyncAction, SyncQueueItem, SyncQueueRepository, SyncStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `processing` items left behind by an interrupted drain, returned to
    /// `pending`.
    pub demoted_processing: usize,
    /// Queue items synthesized for orphaned pending records.
    pub synthesized_items: usize,
}

impl ReconcileReport {
    pub fn healed_anything(&self) -> bool {
        self.demoted_processing > 0 || self.synthesized_items > 0
    }
}

pub async fn reconcile(
    backend: &SharedBackend,
    queue: &SyncQueueRepository,
) -> Result<ReconcileReport, StorageError> {
    let mut report = ReconcileReport {
        demoted_processing: queue.demote_stale_processing().await?,
        synthesized_items: 0,
    };
    for kind in [
        EntityKind::Property,
        EntityKind::Inspection,
        EntityKind::Evidence,
    ] {
        report.synthesized_items += heal_orphans(backend, queue, kind).await?;
    }
    Ok(report)
}

async fn heal_orphans(
    backend: &SharedBackend,
    queue: &SyncQueueRepository,
    kind: EntityKind,
) -> Result<usize, StorageError> {
    let table = kind.table();
    let rows = backend
        .query(
            table,
            RecordFilter::by(IndexField::SyncStatus, SyncStatus::Pending.as_str()),
        )
        .await?;
    let mut healed = 0;
    for row in rows {
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
            warn!("Skipping {} row without an id", table.as_str());
            continue;
        };
        if queue.has_open_items_for(kind, &id).await? {
            continue;
        }
        // Full-record payload: the row is the only surviving description of
        // what the lost mutation wanted.
        let action = if has_server_id(&row) {
            SyncAction::Update
        } else {
            SyncAction::Create
        };
        let item = SyncQueueItem::new(kind, id.clone(), action, row);
        queue.enqueue(&item).await?;
        debug!(
            "Synthesized {} item for orphaned pending {} {}",
            action.as_str(),
            kind.as_str(),
            id
        );
        healed += 1;
    }
    Ok(healed)
}

fn has_server_id(row: &Value) -> bool {
    row.get("serverId")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, RecordWrite, StoreTable};
    use crate::sync::QueueStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> (SharedBackend, SyncQueueRepository) {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());
        let queue = SyncQueueRepository::new(backend.clone());
        (backend, queue)
    }

    async fn seed_row(backend: &SharedBackend, table: StoreTable, row: Value) {
        let id = row["id"].as_str().unwrap().to_string();
        backend
            .put_all(vec![RecordWrite::new(table, id, row)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn orphaned_unsynced_row_gets_a_create_item() {
        let (backend, queue) = fixture();
        seed_row(
            &backend,
            StoreTable::Properties,
            json!({"id": "p1", "name": "Depot", "syncStatus": "pending"}),
        )
        .await;

        let report = reconcile(&backend, &queue).await.unwrap();
        assert_eq!(report.synthesized_items, 1);
        assert!(report.healed_anything());

        let items = queue.list_pending().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity_type, EntityKind::Property);
        assert_eq!(items[0].entity_id, "p1");
        assert_eq!(items[0].action, SyncAction::Create);
        assert_eq!(items[0].payload["name"], "Depot");
    }

    #[tokio::test]
    async fn orphaned_synced_before_row_gets_an_update_item() {
        let (backend, queue) = fixture();
        seed_row(
            &backend,
            StoreTable::Inspections,
            json!({
                "id": "i1",
                "serverId": "srv-i1",
                "propertyId": "p1",
                "syncStatus": "pending"
            }),
        )
        .await;

        let report = reconcile(&backend, &queue).await.unwrap();
        assert_eq!(report.synthesized_items, 1);

        let items = queue.list_pending().await.unwrap();
        assert_eq!(items[0].action, SyncAction::Update);
        assert_eq!(items[0].payload["serverId"], "srv-i1");
    }

    #[tokio::test]
    async fn rows_with_open_items_are_left_alone() {
        let (backend, queue) = fixture();
        seed_row(
            &backend,
            StoreTable::Properties,
            json!({"id": "p1", "name": "Depot", "syncStatus": "pending"}),
        )
        .await;
        queue
            .enqueue(&SyncQueueItem::new(
                EntityKind::Property,
                "p1",
                SyncAction::Create,
                json!({"id": "p1"}),
            ))
            .await
            .unwrap();

        let report = reconcile(&backend, &queue).await.unwrap();
        assert_eq!(report.synthesized_items, 0);
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn synced_and_conflict_rows_are_not_touched() {
        let (backend, queue) = fixture();
        seed_row(
            &backend,
            StoreTable::Properties,
            json!({"id": "p1", "syncStatus": "synced"}),
        )
        .await;
        seed_row(
            &backend,
            StoreTable::Properties,
            json!({"id": "p2", "syncStatus": "conflict"}),
        )
        .await;

        let report = reconcile(&backend, &queue).await.unwrap();
        assert_eq!(report.synthesized_items, 0);
        assert!(queue.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_processing_items_return_to_pending() {
        let (backend, queue) = fixture();
        seed_row(
            &backend,
            StoreTable::Properties,
            json!({"id": "p1", "syncStatus": "pending"}),
        )
        .await;
        let item = SyncQueueItem::new(
            EntityKind::Property,
            "p1",
            SyncAction::Create,
            json!({"id": "p1"}),
        );
        queue.enqueue(&item).await.unwrap();
        queue.mark_processing(&item.id).await.unwrap();

        let report = reconcile(&backend, &queue).await.unwrap();
        assert_eq!(report.demoted_processing, 1);
        // The demoted item reopens the record's coverage; nothing new is
        // synthesized.
        assert_eq!(report.synthesized_items, 0);
        let items = queue.list_pending().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Pending);
    }
}
