//! Inspection CRUD. Same write discipline as properties: one batch per
//! mutation, queue item included, engine-only status transitions.

use chrono::Utc;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::inspections::{Inspection, InspectionPatch, InspectionStatus, NewInspection};
use crate::properties::Property;
use crate::storage::{IndexField, RecordFilter, RecordWrite, SharedBackend, StoreTable};
use crate::sync::{enqueue_write, EntityKind, SyncAction, SyncQueueItem, SyncStatus};

pub struct InspectionRepository {
    backend: SharedBackend,
}

impl InspectionRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Insert a new inspection under an existing property and enqueue its
    /// `create` mutation. The parent's server id, when already known, is
    /// snapshotted so remote payloads can carry both identities.
    pub async fn save(&self, new: NewInspection) -> Result<Inspection, StorageError> {
        new.validate()?;
        let parent = self.require_property(&new.property_id).await?;
        let inspection = Inspection {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            property_id: parent.id.clone(),
            property_server_id: parent.server_id.clone(),
            current_step: new.current_step,
            step_data: new.step_data,
            evidence_ids: Vec::new(),
            status: InspectionStatus::InProgress,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            sync_status: SyncStatus::Pending,
            local_updated_at: Utc::now().to_rfc3339(),
            server_updated_at: None,
        };
        let record = serde_json::to_value(&inspection)?;
        let item = SyncQueueItem::new(
            EntityKind::Inspection,
            &inspection.id,
            SyncAction::Create,
            record.clone(),
        );
        self.backend
            .put_all(vec![
                RecordWrite::new(StoreTable::Inspections, &inspection.id, record),
                enqueue_write(&item)?,
            ])
            .await?;
        debug!(
            "Saved inspection {} for property {} and enqueued create",
            inspection.id, inspection.property_id
        );
        Ok(inspection)
    }

    /// Apply a partial edit and enqueue it. Completing the walkthrough
    /// without an explicit timestamp stamps `completedAt` now.
    pub async fn update(&self, id: &str, patch: InspectionPatch) -> Result<(), StorageError> {
        patch.validate()?;
        let mut inspection = self.require(id).await?;
        let stamped_completion =
            patch.status == Some(InspectionStatus::Completed) && patch.completed_at.is_none();
        patch.apply(&mut inspection);
        if inspection.status == InspectionStatus::Completed && inspection.completed_at.is_none() {
            inspection.completed_at = Some(Utc::now().to_rfc3339());
        }
        inspection.sync_status = SyncStatus::Pending;
        inspection.local_updated_at = Utc::now().to_rfc3339();

        let mut payload = serde_json::to_value(&patch)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("id".to_string(), Value::String(inspection.id.clone()));
            if stamped_completion {
                if let Some(at) = &inspection.completed_at {
                    fields.insert("completedAt".to_string(), Value::String(at.clone()));
                }
            }
            fields.insert(
                "localUpdatedAt".to_string(),
                Value::String(inspection.local_updated_at.clone()),
            );
        }
        let item = SyncQueueItem::new(EntityKind::Inspection, id, SyncAction::Update, payload);
        self.put_with_item(&inspection, &item).await?;
        debug!("Updated inspection {} and enqueued update", id);
        Ok(())
    }

    /// Enqueue deletion; the engine removes the row once the remote confirms.
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut inspection = self.require(id).await?;
        inspection.sync_status = SyncStatus::Pending;
        inspection.local_updated_at = Utc::now().to_rfc3339();
        let payload = serde_json::json!({
            "id": inspection.id,
            "serverId": inspection.server_id,
        });
        let item = SyncQueueItem::new(EntityKind::Inspection, id, SyncAction::Delete, payload);
        self.put_with_item(&inspection, &item).await?;
        debug!("Enqueued delete for inspection {}", id);
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Inspection>, StorageError> {
        let Some(record) = self.backend.get(StoreTable::Inspections, id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(record)?))
    }

    pub async fn get_all(&self) -> Result<Vec<Inspection>, StorageError> {
        self.query(RecordFilter::All).await
    }

    pub async fn get_pending(&self) -> Result<Vec<Inspection>, StorageError> {
        self.query(RecordFilter::by(
            IndexField::SyncStatus,
            SyncStatus::Pending.as_str(),
        ))
        .await
    }

    /// All inspections belonging to one property, by the property's local id.
    pub async fn list_for_property(
        &self,
        property_local_id: &str,
    ) -> Result<Vec<Inspection>, StorageError> {
        self.query(RecordFilter::by(IndexField::PropertyId, property_local_id))
            .await
    }

    /// Sync-engine only: record server identity without touching `syncStatus`.
    pub async fn attach_server_identity(
        &self,
        id: &str,
        server_id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut inspection = self.require(id).await?;
        inspection.server_id = Some(server_id.to_string());
        if let Some(at) = server_updated_at {
            inspection.server_updated_at = Some(at.to_string());
        }
        self.put(&inspection).await
    }

    /// Sync-engine only: the entity's last open item completed.
    pub async fn mark_synced(
        &self,
        id: &str,
        server_id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut inspection = self.require(id).await?;
        inspection.server_id = Some(server_id.to_string());
        if let Some(at) = server_updated_at {
            inspection.server_updated_at = Some(at.to_string());
        }
        inspection.sync_status = SyncStatus::Synced;
        self.put(&inspection).await
    }

    /// Sync-engine only: remote copy changed under an update.
    pub async fn mark_conflict(
        &self,
        id: &str,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut inspection = self.require(id).await?;
        inspection.sync_status = SyncStatus::Conflict;
        if let Some(at) = server_updated_at {
            inspection.server_updated_at = Some(at.to_string());
        }
        self.put(&inspection).await
    }

    /// Sync-engine only: physical removal after a `delete` item completes.
    pub async fn remove_local(&self, id: &str) -> Result<(), StorageError> {
        self.backend.remove(StoreTable::Inspections, id).await
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Inspection>, StorageError> {
        let records = self.backend.query(StoreTable::Inspections, filter).await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StorageError::from))
            .collect()
    }

    async fn require(&self, id: &str) -> Result<Inspection, StorageError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found(StoreTable::Inspections, id))
    }

    async fn require_property(&self, property_id: &str) -> Result<Property, StorageError> {
        let Some(record) = self.backend.get(StoreTable::Properties, property_id).await? else {
            return Err(StorageError::not_found(StoreTable::Properties, property_id));
        };
        Ok(serde_json::from_value(record)?)
    }

    async fn put(&self, inspection: &Inspection) -> Result<(), StorageError> {
        self.backend
            .put(
                StoreTable::Inspections,
                &inspection.id,
                serde_json::to_value(inspection)?,
            )
            .await
    }

    async fn put_with_item(
        &self,
        inspection: &Inspection,
        item: &SyncQueueItem,
    ) -> Result<(), StorageError> {
        self.backend
            .put_all(vec![
                RecordWrite::new(
                    StoreTable::Inspections,
                    &inspection.id,
                    serde_json::to_value(inspection)?,
                ),
                enqueue_write(item)?,
            ])
            .await
    }
}
