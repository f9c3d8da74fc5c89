//! Property CRUD. Every mutation commits the entity row and its queue item
//! as one batch; sync statuses other than `pending` are written only by the
//! sync engine through the dedicated operations at the bottom.

use chrono::Utc;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::properties::{NewProperty, Property, PropertyPatch};
use crate::storage::{IndexField, RecordFilter, RecordWrite, SharedBackend, StoreTable};
use crate::sync::{enqueue_write, EntityKind, SyncAction, SyncQueueItem, SyncStatus};

pub struct PropertyRepository {
    backend: SharedBackend,
}

impl PropertyRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Insert a new property and enqueue its `create` mutation.
    pub async fn save(&self, new: NewProperty) -> Result<Property, StorageError> {
        new.validate()?;
        let property = Property {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            project_id: new.project_id,
            name: new.name,
            address: new.address,
            building_info: new.building_info,
            roof_system_details: new.roof_system_details,
            image_url: new.image_url,
            overall_condition: new.overall_condition,
            last_inspection_date: new.last_inspection_date,
            user_id: new.user_id,
            sync_status: SyncStatus::Pending,
            local_updated_at: Utc::now().to_rfc3339(),
            server_updated_at: None,
        };
        let record = serde_json::to_value(&property)?;
        let item = SyncQueueItem::new(
            EntityKind::Property,
            &property.id,
            SyncAction::Create,
            record.clone(),
        );
        self.backend
            .put_all(vec![
                RecordWrite::new(StoreTable::Properties, &property.id, record),
                enqueue_write(&item)?,
            ])
            .await?;
        debug!("Saved property {} and enqueued create", property.id);
        Ok(property)
    }

    /// Apply a partial edit. The entity returns to `pending` (also out of
    /// `conflict`) and an `update` item carrying only the changed fields is
    /// enqueued.
    pub async fn update(&self, id: &str, patch: PropertyPatch) -> Result<(), StorageError> {
        patch.validate()?;
        let mut property = self.require(id).await?;
        patch.apply(&mut property);
        property.sync_status = SyncStatus::Pending;
        property.local_updated_at = Utc::now().to_rfc3339();

        let mut payload = serde_json::to_value(&patch)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("id".to_string(), Value::String(property.id.clone()));
            fields.insert(
                "localUpdatedAt".to_string(),
                Value::String(property.local_updated_at.clone()),
            );
        }
        let item = SyncQueueItem::new(EntityKind::Property, id, SyncAction::Update, payload);
        self.put_with_item(&property, &item).await?;
        debug!("Updated property {} and enqueued update", id);
        Ok(())
    }

    /// Enqueue deletion. The row stays in place (re-stamped `pending`) until
    /// the engine confirms the remote delete and removes it.
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut property = self.require(id).await?;
        property.sync_status = SyncStatus::Pending;
        property.local_updated_at = Utc::now().to_rfc3339();
        let payload = serde_json::json!({
            "id": property.id,
            "serverId": property.server_id,
        });
        let item = SyncQueueItem::new(EntityKind::Property, id, SyncAction::Delete, payload);
        self.put_with_item(&property, &item).await?;
        debug!("Enqueued delete for property {}", id);
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Property>, StorageError> {
        let Some(record) = self.backend.get(StoreTable::Properties, id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(record)?))
    }

    pub async fn get_all(&self) -> Result<Vec<Property>, StorageError> {
        self.query(RecordFilter::All).await
    }

    pub async fn get_pending(&self) -> Result<Vec<Property>, StorageError> {
        self.query(RecordFilter::by(
            IndexField::SyncStatus,
            SyncStatus::Pending.as_str(),
        ))
        .await
    }

    /// Sync-engine only: record the server identity from an acknowledgement
    /// without touching `syncStatus` (used while other queue items for the
    /// entity are still open).
    pub async fn attach_server_identity(
        &self,
        id: &str,
        server_id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut property = self.require(id).await?;
        property.server_id = Some(server_id.to_string());
        if let Some(at) = server_updated_at {
            property.server_updated_at = Some(at.to_string());
        }
        self.put(&property).await
    }

    /// Sync-engine only: the entity's last open item completed.
    pub async fn mark_synced(
        &self,
        id: &str,
        server_id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut property = self.require(id).await?;
        property.server_id = Some(server_id.to_string());
        if let Some(at) = server_updated_at {
            property.server_updated_at = Some(at.to_string());
        }
        property.sync_status = SyncStatus::Synced;
        self.put(&property).await
    }

    /// Sync-engine only: the remote rejected an update because its copy
    /// changed. A later local edit resolves by re-entering `pending`.
    pub async fn mark_conflict(
        &self,
        id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut property = self.require(id).await?;
        property.sync_status = SyncStatus::Conflict;
        if let Some(at) = server_updated_at {
            property.server_updated_at = Some(at.to_string());
        }
        self.put(&property).await
    }

    /// Sync-engine only: physical removal after a `delete` item completes.
    pub async fn remove_local(&self, id: &str) -> Result<(), StorageError> {
        self.backend.remove(StoreTable::Properties, id).await
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Property>, StorageError> {
        let records = self.backend.query(StoreTable::Properties, filter).await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StorageError::from))
            .collect()
    }

    async fn require(&self, id: &str) -> Result<Property, StorageError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found(StoreTable::Properties, id))
    }

    async fn put(&self, property: &Property) -> Result<(), StorageError> {
        self.backend
            .put(
                StoreTable::Properties,
                &property.id,
                serde_json::to_value(property)?,
            )
            .await
    }

    async fn put_with_item(
        &self,
        property: &Property,
        item: &SyncQueueItem,
    ) -> Result<(), StorageError> {
        self.backend
            .put_all(vec![
                RecordWrite::new(
                    StoreTable::Properties,
                    &property.id,
                    serde_json::to_value(property)?,
                ),
                enqueue_write(item)?,
            ])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::BuildingInfo;
    use crate::storage::MemoryBackend;
    use crate::sync::SyncQueueRepository;
    use std::sync::Arc;

    fn fixture() -> (SharedBackend, PropertyRepository, SyncQueueRepository) {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());
        (
            backend.clone(),
            PropertyRepository::new(backend.clone()),
            SyncQueueRepository::new(backend),
        )
    }

    fn new_property(name: &str) -> NewProperty {
        NewProperty {
            name: name.to_string(),
            ..NewProperty::default()
        }
    }

    #[tokio::test]
    async fn save_commits_row_and_create_item_together() {
        let (backend, repo, queue) = fixture();
        let property = repo.save(new_property("14 Oak Ridge")).await.unwrap();

        assert_eq!(property.sync_status, SyncStatus::Pending);
        assert!(property.server_id.is_none());
        assert!(Uuid::parse_str(&property.id).is_ok());

        let record = backend
            .get(StoreTable::Properties, &property.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["name"], "14 Oak Ridge");
        assert_eq!(record["syncStatus"], "pending");

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_type, EntityKind::Property);
        assert_eq!(pending[0].entity_id, property.id);
        assert_eq!(pending[0].action, SyncAction::Create);
        assert_eq!(pending[0].payload["id"], property.id.as_str());
    }

    #[tokio::test]
    async fn invalid_payload_commits_nothing() {
        let (backend, repo, queue) = fixture();

        let blank = repo.save(new_property("   ")).await;
        assert!(matches!(blank, Err(StorageError::InvalidPayload(_))));

        let mut bad_blob = new_property("Mill Creek Plant");
        bad_blob.building_info = Some(BuildingInfo {
            schema_version: 99,
            ..BuildingInfo::default()
        });
        let rejected = repo.save(bad_blob).await;
        assert!(matches!(rejected, Err(StorageError::InvalidPayload(_))));

        assert_eq!(
            backend
                .count(StoreTable::Properties, RecordFilter::All)
                .await
                .unwrap(),
            0
        );
        assert!(queue.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_restamps_pending_and_carries_partial_payload() {
        let (_, repo, queue) = fixture();
        let property = repo.save(new_property("Harborview Depot")).await.unwrap();
        repo.mark_synced(&property.id, "srv-9", Some("2026-07-01T10:00:00Z"))
            .await
            .unwrap();

        let patch = PropertyPatch {
            address: Some("900 Pier Ave".to_string()),
            ..PropertyPatch::default()
        };
        repo.update(&property.id, patch).await.unwrap();

        let updated = repo.get_by_id(&property.id).await.unwrap().unwrap();
        assert_eq!(updated.sync_status, SyncStatus::Pending);
        assert_eq!(updated.address.as_deref(), Some("900 Pier Ave"));
        assert_eq!(updated.server_id.as_deref(), Some("srv-9"));

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        let update_item = &pending[1];
        assert_eq!(update_item.action, SyncAction::Update);
        assert_eq!(update_item.payload["address"], "900 Pier Ave");
        assert_eq!(update_item.payload["id"], property.id.as_str());
        assert!(update_item.payload.get("name").is_none());
    }

    #[tokio::test]
    async fn update_resolves_conflict_by_reentering_pending() {
        let (_, repo, _) = fixture();
        let property = repo.save(new_property("Gateway Tower")).await.unwrap();
        repo.mark_conflict(&property.id, Some("2026-07-02T08:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            repo.get_by_id(&property.id)
                .await
                .unwrap()
                .unwrap()
                .sync_status,
            SyncStatus::Conflict
        );

        let patch = PropertyPatch {
            name: Some("Gateway Tower East".to_string()),
            ..PropertyPatch::default()
        };
        repo.update(&property.id, patch).await.unwrap();

        let resolved = repo.get_by_id(&property.id).await.unwrap().unwrap();
        assert_eq!(resolved.sync_status, SyncStatus::Pending);
        assert_eq!(resolved.name, "Gateway Tower East");
    }

    #[tokio::test]
    async fn delete_keeps_row_until_engine_removes_it() {
        let (_, repo, queue) = fixture();
        let property = repo.save(new_property("Old Mill Annex")).await.unwrap();
        repo.delete(&property.id).await.unwrap();

        let still_there = repo.get_by_id(&property.id).await.unwrap().unwrap();
        assert_eq!(still_there.sync_status, SyncStatus::Pending);

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        let delete_item = &pending[1];
        assert_eq!(delete_item.action, SyncAction::Delete);
        assert_eq!(delete_item.payload["id"], property.id.as_str());
        assert!(delete_item.payload["serverId"].is_null());

        repo.remove_local(&property.id).await.unwrap();
        assert!(repo.get_by_id(&property.id).await.unwrap().is_none());
        assert_eq!(queue.list_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_pending_filters_on_sync_status() {
        let (_, repo, queue) = fixture();
        let a = repo.save(new_property("Site A")).await.unwrap();
        let b = repo.save(new_property("Site B")).await.unwrap();
        for item in queue.list_pending().await.unwrap() {
            queue.mark_completed(&item.id).await.unwrap();
        }
        repo.mark_synced(&a.id, "srv-a", None).await.unwrap();

        let pending = repo.get_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let synced = repo.get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.server_id.as_deref(), Some("srv-a"));
    }

    #[tokio::test]
    async fn attach_server_identity_leaves_status_untouched() {
        let (_, repo, _) = fixture();
        let property = repo.save(new_property("Quarry Office")).await.unwrap();
        repo.attach_server_identity(&property.id, "srv-3", Some("2026-07-03T12:00:00Z"))
            .await
            .unwrap();

        let stored = repo.get_by_id(&property.id).await.unwrap().unwrap();
        assert_eq!(stored.server_id.as_deref(), Some("srv-3"));
        assert_eq!(
            stored.server_updated_at.as_deref(),
            Some("2026-07-03T12:00:00Z")
        );
        assert_eq!(stored.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn updating_missing_property_reports_not_found() {
        let (_, repo, _) = fixture();
        let patch = PropertyPatch {
            name: Some("anything".to_string()),
            ..PropertyPatch::default()
        };
        let result = repo.update("no-such-id", patch).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
