//! Sync engine: drains the queue against the remote API, applies the retry
//! policy, keeps entity and queue statuses honest, then runs the evidence
//! media pass. One drain at a time; one item's failure never aborts a pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::app_state::{AppStateStore, LAST_SYNC_COMPLETED_AT};
use crate::errors::{RemoteError, StorageError};
use crate::evidence::{Evidence, EvidenceRepository};
use crate::inspections::InspectionRepository;
use crate::properties::PropertyRepository;
use crate::sync::{
    EntityKind, MediaUpload, QueueStatus, RemoteAck, SharedRemote, SyncAction, SyncQueueItem,
    SyncQueueRepository, SyncTrigger,
};

/// How a drain request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// The pass ran (counts below describe it).
    Drained,
    /// Skipped: the reachability flag is off. Attempt counters untouched.
    Offline,
    /// Skipped: another drain held the gate. The trigger is dropped, not
    /// queued.
    AlreadyRunning,
}

/// Summary of one drain request, queue pass and media pass included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub trigger: SyncTrigger,
    pub outcome: DrainOutcome,
    pub processed: usize,
    pub completed: usize,
    pub conflicts: usize,
    pub retried: usize,
    pub failed: usize,
    pub media_uploaded: usize,
    pub media_failed: usize,
}

impl DrainReport {
    fn empty(trigger: SyncTrigger, outcome: DrainOutcome) -> Self {
        Self {
            trigger,
            outcome,
            processed: 0,
            completed: 0,
            conflicts: 0,
            retried: 0,
            failed: 0,
            media_uploaded: 0,
            media_failed: 0,
        }
    }
}

enum ItemOutcome {
    Completed,
    Conflict,
    Retried,
    Failed,
}

pub struct SyncEngine {
    queue: Arc<SyncQueueRepository>,
    properties: Arc<PropertyRepository>,
    inspections: Arc<InspectionRepository>,
    evidence: Arc<EvidenceRepository>,
    app_state: Arc<AppStateStore>,
    remote: SharedRemote,
    /// Reachability flag fed by the embedding app; starts offline until the
    /// first signal arrives.
    online: AtomicBool,
    drain_gate: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<SyncQueueRepository>,
        properties: Arc<PropertyRepository>,
        inspections: Arc<InspectionRepository>,
        evidence: Arc<EvidenceRepository>,
        app_state: Arc<AppStateStore>,
        remote: SharedRemote,
    ) -> Self {
        Self {
            queue,
            properties,
            inspections,
            evidence,
            app_state,
            remote,
            online: AtomicBool::new(false),
            drain_gate: Mutex::new(()),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Run one drain: the queue pass in FIFO order, then the media pass.
    /// Remote failures are absorbed into per-item outcomes; an error here
    /// means the local store itself misbehaved.
    pub async fn drain(&self, trigger: SyncTrigger) -> Result<DrainReport, StorageError> {
        if !self.is_online() {
            debug!("Skipping {} sync: offline", trigger.as_str());
            return Ok(DrainReport::empty(trigger, DrainOutcome::Offline));
        }
        let Ok(_gate) = self.drain_gate.try_lock() else {
            debug!(
                "Skipping {} sync: a drain is already in progress",
                trigger.as_str()
            );
            return Ok(DrainReport::empty(trigger, DrainOutcome::AlreadyRunning));
        };

        let mut report = DrainReport::empty(trigger, DrainOutcome::Drained);
        let pending = self.queue.list_pending().await?;
        if !pending.is_empty() {
            info!(
                "Draining {} pending sync item(s) ({})",
                pending.len(),
                trigger.as_str()
            );
        }
        for item in &pending {
            report.processed += 1;
            match self.process_item(item).await {
                ItemOutcome::Completed => report.completed += 1,
                ItemOutcome::Conflict => report.conflicts += 1,
                ItemOutcome::Retried => report.retried += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        self.media_pass(&mut report).await;

        if let Err(err) = self
            .app_state
            .set(LAST_SYNC_COMPLETED_AT, &Utc::now().to_rfc3339())
            .await
        {
            warn!("Could not record sync completion time: {}", err);
        }
        if report.processed > 0 || report.media_uploaded > 0 || report.media_failed > 0 {
            info!(
                "Sync drain ({}) finished: {} processed, {} completed, {} conflicts, {} retried, {} failed, {} media uploaded, {} media failed",
                trigger.as_str(),
                report.processed,
                report.completed,
                report.conflicts,
                report.retried,
                report.failed,
                report.media_uploaded,
                report.media_failed
            );
        }
        Ok(report)
    }

    async fn process_item(&self, item: &SyncQueueItem) -> ItemOutcome {
        if let Err(err) = self.queue.mark_processing(&item.id).await {
            warn!("Could not mark sync item {} processing: {}", item.id, err);
            return ItemOutcome::Failed;
        }
        match item.action {
            SyncAction::Delete => self.process_delete(item).await,
            SyncAction::Create | SyncAction::Update => self.process_upsert(item).await,
        }
    }

    async fn process_upsert(&self, item: &SyncQueueItem) -> ItemOutcome {
        let sent = match item.action {
            SyncAction::Create => {
                let payload = self.create_payload(item).await;
                self.remote
                    .create_entity(item.entity_type, &item.entity_id, &payload)
                    .await
            }
            _ => {
                let server_id = self.current_server_id(item).await;
                self.remote
                    .update_entity(
                        item.entity_type,
                        &item.entity_id,
                        server_id.as_deref(),
                        &item.payload,
                    )
                    .await
            }
        };
        match sent {
            Ok(ack) => match self.complete_upsert(item, &ack).await {
                Ok(()) => ItemOutcome::Completed,
                Err(err) => {
                    warn!(
                        "Sync item {} acknowledged remotely but local bookkeeping failed: {}",
                        item.id, err
                    );
                    self.record_failure(item, &format!("local bookkeeping failed: {err}"))
                        .await
                }
            },
            Err(RemoteError::Conflict { server_updated_at }) if conflict_applies(item) => {
                self.apply_conflict(item, server_updated_at.as_deref()).await
            }
            Err(err) => {
                warn!(
                    "Sync item {} ({} {} {}) failed: {}",
                    item.id,
                    item.action.as_str(),
                    item.entity_type.as_str(),
                    item.entity_id,
                    err
                );
                self.record_failure(item, &err.to_string()).await
            }
        }
    }

    async fn process_delete(&self, item: &SyncQueueItem) -> ItemOutcome {
        let server_id = item
            .payload
            .get("serverId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let server_id = match server_id {
            Some(id) => Some(id),
            None => self.current_server_id(item).await,
        };
        match self
            .remote
            .delete_entity(item.entity_type, &item.entity_id, server_id.as_deref())
            .await
        {
            Ok(()) => {}
            // The remote never saw this entity; the deletion is already true.
            Err(RemoteError::Api { status: 404, .. }) => {
                debug!(
                    "Remote has no {} {}; treating delete as done",
                    item.entity_type.as_str(),
                    item.entity_id
                );
            }
            Err(RemoteError::Conflict { server_updated_at })
                if item.entity_type != EntityKind::Evidence =>
            {
                return self.apply_conflict(item, server_updated_at.as_deref()).await;
            }
            Err(err) => {
                warn!(
                    "Sync item {} (delete {} {}) failed: {}",
                    item.id,
                    item.entity_type.as_str(),
                    item.entity_id,
                    err
                );
                return self.record_failure(item, &err.to_string()).await;
            }
        }
        match self.finish_delete(item).await {
            Ok(()) => ItemOutcome::Completed,
            Err(err) => {
                warn!(
                    "Remote delete for {} {} confirmed but local removal failed: {}",
                    item.entity_type.as_str(),
                    item.entity_id,
                    err
                );
                self.record_failure(item, &format!("local bookkeeping failed: {err}"))
                    .await
            }
        }
    }

    /// Row first, then the item: a crash in between re-sends an idempotent
    /// delete instead of leaving a deleted-remotely row that reconciliation
    /// would resurrect.
    async fn finish_delete(&self, item: &SyncQueueItem) -> Result<(), StorageError> {
        match item.entity_type {
            EntityKind::Property => self.properties.remove_local(&item.entity_id).await?,
            EntityKind::Inspection => self.inspections.remove_local(&item.entity_id).await?,
            EntityKind::Evidence => self.evidence.remove_local(&item.entity_id).await?,
        }
        self.queue.mark_completed(&item.id).await
    }

    /// Item first, then the entity: a crash in between leaves the entity
    /// `pending` with no open item, which reconciliation heals with a fresh
    /// update, instead of a `synced` entity with an open item.
    async fn complete_upsert(
        &self,
        item: &SyncQueueItem,
        ack: &RemoteAck,
    ) -> Result<(), StorageError> {
        self.queue.mark_completed(&item.id).await?;
        let still_open = self
            .queue
            .has_open_items_for(item.entity_type, &item.entity_id)
            .await?;
        if still_open {
            self.attach_identity(item, ack).await
        } else {
            self.mark_entity_synced(item, ack).await
        }
    }

    async fn attach_identity(
        &self,
        item: &SyncQueueItem,
        ack: &RemoteAck,
    ) -> Result<(), StorageError> {
        match item.entity_type {
            EntityKind::Property => {
                self.properties
                    .attach_server_identity(
                        &item.entity_id,
                        &ack.server_id,
                        ack.server_updated_at.as_deref(),
                    )
                    .await
            }
            EntityKind::Inspection => {
                self.inspections
                    .attach_server_identity(
                        &item.entity_id,
                        &ack.server_id,
                        ack.server_updated_at.as_deref(),
                    )
                    .await
            }
            EntityKind::Evidence => {
                self.evidence
                    .attach_server_identity(&item.entity_id, &ack.server_id)
                    .await
            }
        }
    }

    async fn mark_entity_synced(
        &self,
        item: &SyncQueueItem,
        ack: &RemoteAck,
    ) -> Result<(), StorageError> {
        match item.entity_type {
            EntityKind::Property => {
                self.properties
                    .mark_synced(
                        &item.entity_id,
                        &ack.server_id,
                        ack.server_updated_at.as_deref(),
                    )
                    .await
            }
            EntityKind::Inspection => {
                self.inspections
                    .mark_synced(
                        &item.entity_id,
                        &ack.server_id,
                        ack.server_updated_at.as_deref(),
                    )
                    .await
            }
            EntityKind::Evidence => {
                self.evidence
                    .mark_synced(&item.entity_id, &ack.server_id)
                    .await
            }
        }
    }

    async fn apply_conflict(
        &self,
        item: &SyncQueueItem,
        server_updated_at: Option<&str>,
    ) -> ItemOutcome {
        match self.apply_conflict_inner(item, server_updated_at).await {
            Ok(()) => {
                warn!(
                    "Remote copy of {} {} changed; entity marked for review",
                    item.entity_type.as_str(),
                    item.entity_id
                );
                ItemOutcome::Conflict
            }
            Err(err) => {
                warn!(
                    "Could not record conflict for sync item {}: {}",
                    item.id, err
                );
                self.record_failure(item, &format!("local bookkeeping failed: {err}"))
                    .await
            }
        }
    }

    /// The conflicted payload is never re-sent automatically: re-sending it
    /// could only overwrite the newer remote write. The item completes and
    /// the entity waits for a resolving local edit.
    async fn apply_conflict_inner(
        &self,
        item: &SyncQueueItem,
        server_updated_at: Option<&str>,
    ) -> Result<(), StorageError> {
        self.queue.mark_completed(&item.id).await?;
        match item.entity_type {
            EntityKind::Property => {
                self.properties
                    .mark_conflict(&item.entity_id, server_updated_at)
                    .await
            }
            EntityKind::Inspection => {
                self.inspections
                    .mark_conflict(&item.entity_id, server_updated_at)
                    .await
            }
            EntityKind::Evidence => Ok(()),
        }
    }

    async fn record_failure(&self, item: &SyncQueueItem, error: &str) -> ItemOutcome {
        match self.queue.mark_failed_attempt(&item.id, error).await {
            Ok(QueueStatus::Failed) => ItemOutcome::Failed,
            Ok(_) => ItemOutcome::Retried,
            Err(err) => {
                warn!(
                    "Could not record failed attempt for sync item {}: {}",
                    item.id, err
                );
                ItemOutcome::Failed
            }
        }
    }

    /// Create payloads were snapshotted at save time, possibly before the
    /// parent entity acquired its server id. Refresh the parent linkage just
    /// before sending; references still resolve by local id either way.
    async fn create_payload(&self, item: &SyncQueueItem) -> Value {
        let mut payload = item.payload.clone();
        match item.entity_type {
            EntityKind::Property => {}
            EntityKind::Inspection => {
                let parent_id = payload
                    .get("propertyId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(parent_id) = parent_id {
                    if let Ok(Some(parent)) = self.properties.get_by_id(&parent_id).await {
                        if let (Some(fields), Some(server_id)) =
                            (payload.as_object_mut(), parent.server_id)
                        {
                            fields.insert(
                                "propertyServerId".to_string(),
                                Value::String(server_id),
                            );
                        }
                    }
                }
            }
            EntityKind::Evidence => {
                let parent_id = payload
                    .get("inspectionId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(parent_id) = parent_id {
                    if let Ok(Some(parent)) = self.inspections.get_by_id(&parent_id).await {
                        if let (Some(fields), Some(server_id)) =
                            (payload.as_object_mut(), parent.server_id)
                        {
                            fields.insert(
                                "inspectionServerId".to_string(),
                                Value::String(server_id),
                            );
                        }
                    }
                }
            }
        }
        payload
    }

    async fn current_server_id(&self, item: &SyncQueueItem) -> Option<String> {
        match item.entity_type {
            EntityKind::Property => self
                .properties
                .get_by_id(&item.entity_id)
                .await
                .ok()
                .flatten()
                .and_then(|p| p.server_id),
            EntityKind::Inspection => self
                .inspections
                .get_by_id(&item.entity_id)
                .await
                .ok()
                .flatten()
                .and_then(|i| i.server_id),
            EntityKind::Evidence => self
                .evidence
                .get_by_id(&item.entity_id)
                .await
                .ok()
                .flatten()
                .and_then(|e| e.server_id),
        }
    }

    /// Upload every capture that still needs it. Failures feed the
    /// evidence-local attempt counter, never the queue's.
    async fn media_pass(&self, report: &mut DrainReport) {
        let uploads = match self.evidence.list_pending_uploads().await {
            Ok(list) => list,
            Err(err) => {
                warn!("Skipping media pass: {}", err);
                return;
            }
        };
        if uploads.is_empty() {
            return;
        }
        info!("Uploading {} evidence file(s)", uploads.len());
        for row in uploads {
            match self.upload_one(&row).await {
                Ok(()) => report.media_uploaded += 1,
                Err(reason) => {
                    warn!("Evidence {} media upload failed: {}", row.id, reason);
                    report.media_failed += 1;
                    if let Err(err) = self.evidence.record_upload_failure(&row.id).await {
                        warn!(
                            "Could not record upload failure for evidence {}: {}",
                            row.id, err
                        );
                    }
                }
            }
        }
    }

    async fn upload_one(&self, evidence: &Evidence) -> Result<(), String> {
        let Some(path) = evidence.local_path.clone() else {
            return Err("no local file".to_string());
        };
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|err| format!("file read task failed: {err}"))?
            .map_err(|err| format!("could not read capture file: {err}"))?;
        let inspection_server_id = self
            .inspections
            .get_by_id(&evidence.inspection_id)
            .await
            .ok()
            .flatten()
            .and_then(|i| i.server_id);
        let upload = MediaUpload {
            evidence_local_id: evidence.id.clone(),
            inspection_local_id: evidence.inspection_id.clone(),
            inspection_server_id,
            file_name: evidence.upload_file_name(),
            content_type: evidence.content_type().to_string(),
            bytes,
        };
        let ack = self
            .remote
            .upload_evidence_media(upload)
            .await
            .map_err(|err| err.to_string())?;
        self.evidence
            .record_upload_success(&evidence.id, &ack.remote_url)
            .await
            .map_err(|err| err.to_string())?;
        debug!("Evidence {} media uploaded to {}", evidence.id, ack.remote_url);
        Ok(())
    }
}

/// Conflict handling is for properties and inspections; evidence has no
/// `conflict` state, so a 409 there follows the generic failure path. A 409
/// on create also stays generic (create payloads cannot race a newer remote
/// copy of themselves).
fn conflict_applies(item: &SyncQueueItem) -> bool {
    item.action == SyncAction::Update && item.entity_type != EntityKind::Evidence
}
