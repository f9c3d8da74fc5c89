//! Evidence CRUD plus the media-upload bookkeeping the sync engine drives.
//! Field-record changes go through the queue like any other entity; the
//! binary upload has its own attempt counter and never touches the queue.

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::evidence::{Evidence, EvidencePatch, NewEvidence, MAX_UPLOAD_ATTEMPTS};
use crate::inspections::Inspection;
use crate::storage::{IndexField, RecordFilter, RecordWrite, SharedBackend, StoreTable};
use crate::sync::{enqueue_write, EntityKind, EvidenceSyncStatus, SyncAction, SyncQueueItem};

pub struct EvidenceRepository {
    backend: SharedBackend,
}

impl EvidenceRepository {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Insert a new capture under an existing inspection and enqueue its
    /// `create` mutation. The file itself is uploaded later by the media
    /// pass.
    pub async fn save(&self, new: NewEvidence) -> Result<Evidence, StorageError> {
        new.validate()?;
        let parent = self.require_inspection(&new.inspection_id).await?;
        let now = Utc::now().to_rfc3339();
        let evidence = Evidence {
            id: Uuid::new_v4().to_string(),
            server_id: None,
            inspection_id: parent.id.clone(),
            inspection_server_id: parent.server_id.clone(),
            step: new.step,
            evidence_type: new.evidence_type,
            local_path: new.local_path,
            remote_url: None,
            metadata: new.metadata,
            captured_at: new.captured_at.unwrap_or_else(|| now.clone()),
            latitude: new.latitude,
            longitude: new.longitude,
            sync_status: EvidenceSyncStatus::Pending,
            upload_attempts: 0,
            local_updated_at: now,
        };
        let record = serde_json::to_value(&evidence)?;
        let item = SyncQueueItem::new(
            EntityKind::Evidence,
            &evidence.id,
            SyncAction::Create,
            record.clone(),
        );
        self.backend
            .put_all(vec![
                RecordWrite::new(StoreTable::Evidence, &evidence.id, record),
                enqueue_write(&item)?,
            ])
            .await?;
        debug!(
            "Saved evidence {} ({}) for inspection {} and enqueued create",
            evidence.id,
            evidence.evidence_type.as_str(),
            evidence.inspection_id
        );
        Ok(evidence)
    }

    /// Apply an annotation edit and enqueue it.
    pub async fn update(&self, id: &str, patch: EvidencePatch) -> Result<(), StorageError> {
        patch.validate()?;
        let mut evidence = self.require(id).await?;
        patch.apply(&mut evidence);
        evidence.sync_status = EvidenceSyncStatus::Pending;
        evidence.local_updated_at = Utc::now().to_rfc3339();

        let mut payload = serde_json::to_value(&patch)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("id".to_string(), Value::String(evidence.id.clone()));
            fields.insert(
                "localUpdatedAt".to_string(),
                Value::String(evidence.local_updated_at.clone()),
            );
        }
        let item = SyncQueueItem::new(EntityKind::Evidence, id, SyncAction::Update, payload);
        self.put_with_item(&evidence, &item).await?;
        debug!("Updated evidence {} and enqueued update", id);
        Ok(())
    }

    /// Enqueue deletion; the engine removes the row once the remote confirms.
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut evidence = self.require(id).await?;
        evidence.sync_status = EvidenceSyncStatus::Pending;
        evidence.local_updated_at = Utc::now().to_rfc3339();
        let payload = serde_json::json!({
            "id": evidence.id,
            "serverId": evidence.server_id,
        });
        let item = SyncQueueItem::new(EntityKind::Evidence, id, SyncAction::Delete, payload);
        self.put_with_item(&evidence, &item).await?;
        debug!("Enqueued delete for evidence {}", id);
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Evidence>, StorageError> {
        let Some(record) = self.backend.get(StoreTable::Evidence, id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(record)?))
    }

    pub async fn get_all(&self) -> Result<Vec<Evidence>, StorageError> {
        self.query(RecordFilter::All).await
    }

    pub async fn get_pending(&self) -> Result<Vec<Evidence>, StorageError> {
        self.query(RecordFilter::by(
            IndexField::SyncStatus,
            EvidenceSyncStatus::Pending.as_str(),
        ))
        .await
    }

    /// All evidence belonging to one inspection, by the inspection's local id.
    pub async fn list_for_inspection(
        &self,
        inspection_local_id: &str,
    ) -> Result<Vec<Evidence>, StorageError> {
        self.query(RecordFilter::by(
            IndexField::InspectionId,
            inspection_local_id,
        ))
        .await
    }

    /// Sync-engine only: record server identity without touching `syncStatus`.
    pub async fn attach_server_identity(
        &self,
        id: &str,
        server_id: &str,
    ) -> Result<(), StorageError> {
        let mut evidence = self.require(id).await?;
        evidence.server_id = Some(server_id.to_string());
        self.put(&evidence).await
    }

    /// Sync-engine only: the entity's last open item completed.
    pub async fn mark_synced(&self, id: &str, server_id: &str) -> Result<(), StorageError> {
        let mut evidence = self.require(id).await?;
        evidence.server_id = Some(server_id.to_string());
        evidence.sync_status = EvidenceSyncStatus::Synced;
        self.put(&evidence).await
    }

    /// Sync-engine only: physical removal after a `delete` item completes.
    pub async fn remove_local(&self, id: &str) -> Result<(), StorageError> {
        self.backend.remove(StoreTable::Evidence, id).await
    }

    /// Rows the next media pass should upload: a local file, no remote URL
    /// yet, attempts under the cap, not marked failed.
    pub async fn list_pending_uploads(&self) -> Result<Vec<Evidence>, StorageError> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(upload_pending).collect())
    }

    /// Rows whose media upload is out of automatic attempts.
    pub async fn list_failed_uploads(&self) -> Result<Vec<Evidence>, StorageError> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(upload_failed).collect())
    }

    /// Sync-engine only: the media endpoint acknowledged the upload.
    pub async fn record_upload_success(
        &self,
        id: &str,
        remote_url: &str,
    ) -> Result<(), StorageError> {
        let mut evidence = self.require(id).await?;
        evidence.remote_url = Some(remote_url.to_string());
        self.put(&evidence).await
    }

    /// Sync-engine only: one media upload attempt failed. At the cap the
    /// evidence is stamped `failed` and leaves the automatic rotation.
    pub async fn record_upload_failure(
        &self,
        id: &str,
    ) -> Result<EvidenceSyncStatus, StorageError> {
        let mut evidence = self.require(id).await?;
        evidence.upload_attempts += 1;
        if evidence.upload_attempts >= MAX_UPLOAD_ATTEMPTS {
            evidence.sync_status = EvidenceSyncStatus::Failed;
            warn!(
                "Evidence {} media upload failed permanently after {} attempts",
                id, evidence.upload_attempts
            );
        }
        self.put(&evidence).await?;
        Ok(evidence.sync_status)
    }

    /// Manual "retry failed uploads" action: counters reset to 0 and failed
    /// rows return to `pending`.
    pub async fn retry_failed_uploads(&self) -> Result<usize, StorageError> {
        let failed = self.list_failed_uploads().await?;
        if failed.is_empty() {
            return Ok(0);
        }
        let count = failed.len();
        let writes = failed
            .into_iter()
            .map(|mut evidence| {
                evidence.upload_attempts = 0;
                if evidence.sync_status == EvidenceSyncStatus::Failed {
                    evidence.sync_status = EvidenceSyncStatus::Pending;
                }
                Ok(RecordWrite::new(
                    StoreTable::Evidence,
                    &evidence.id,
                    serde_json::to_value(&evidence)?,
                ))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        self.backend.put_all(writes).await?;
        info!("Requeued {} failed media upload(s) for retry", count);
        Ok(count)
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<Evidence>, StorageError> {
        let records = self.backend.query(StoreTable::Evidence, filter).await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StorageError::from))
            .collect()
    }

    async fn require(&self, id: &str) -> Result<Evidence, StorageError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found(StoreTable::Evidence, id))
    }

    async fn require_inspection(&self, inspection_id: &str) -> Result<Inspection, StorageError> {
        let Some(record) = self
            .backend
            .get(StoreTable::Inspections, inspection_id)
            .await?
        else {
            return Err(StorageError::not_found(
                StoreTable::Inspections,
                inspection_id,
            ));
        };
        Ok(serde_json::from_value(record)?)
    }

    async fn put(&self, evidence: &Evidence) -> Result<(), StorageError> {
        self.backend
            .put(
                StoreTable::Evidence,
                &evidence.id,
                serde_json::to_value(evidence)?,
            )
            .await
    }

    async fn put_with_item(
        &self,
        evidence: &Evidence,
        item: &SyncQueueItem,
    ) -> Result<(), StorageError> {
        self.backend
            .put_all(vec![
                RecordWrite::new(
                    StoreTable::Evidence,
                    &evidence.id,
                    serde_json::to_value(evidence)?,
                ),
                enqueue_write(item)?,
            ])
            .await
    }
}

fn upload_pending(evidence: &Evidence) -> bool {
    evidence.local_path.is_some()
        && evidence.remote_url.is_none()
        && evidence.upload_attempts < MAX_UPLOAD_ATTEMPTS
        && evidence.sync_status != EvidenceSyncStatus::Failed
}

fn upload_failed(evidence: &Evidence) -> bool {
    evidence.local_path.is_some()
        && evidence.remote_url.is_none()
        && (evidence.upload_attempts >= MAX_UPLOAD_ATTEMPTS
            || evidence.sync_status == EvidenceSyncStatus::Failed)
}
