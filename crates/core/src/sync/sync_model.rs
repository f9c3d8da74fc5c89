//! Sync domain vocabulary: entity kinds, queue items, statuses, triggers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::storage::StoreTable;

/// Automatic retries stop once a queue item has failed this many attempts.
pub const MAX_SYNC_ATTEMPTS: i32 = 3;

/// Entity kinds that participate in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Inspection,
    Evidence,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Inspection => "inspection",
            EntityKind::Evidence => "evidence",
        }
    }

    /// Table holding this kind's entity rows.
    pub fn table(&self) -> StoreTable {
        match self {
            EntityKind::Property => StoreTable::Properties,
            EntityKind::Inspection => StoreTable::Inspections,
            EntityKind::Evidence => StoreTable::Evidence,
        }
    }
}

/// Mutation kinds recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

/// Queue item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Non-completed items keep their entity `pending` (invariant: an entity
    /// is pending iff at least one open item references it).
    pub fn is_open(&self) -> bool {
        !matches!(self, QueueStatus::Completed)
    }
}

/// Field-sync status for properties and inspections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }
}

/// Field-sync status for evidence; `failed` is the terminal media-upload
/// state, reached through the evidence-local attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSyncStatus {
    Pending,
    Synced,
    Failed,
}

impl EvidenceSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSyncStatus::Pending => "pending",
            EvidenceSyncStatus::Synced => "synced",
            EvidenceSyncStatus::Failed => "failed",
        }
    }
}

/// Queue totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Trigger source for drain passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Reconnected,
    Periodic,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Reconnected => "reconnected",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// One durable record of a single pending mutation against one entity.
///
/// Items are append-only: each edit produces a new item referencing the same
/// entity; earlier items are never merged or rewritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub action: SyncAction,
    pub payload: Value,
    pub created_at: String,
    pub attempts: i32,
    pub last_attempt_at: Option<String>,
    pub error_message: Option<String>,
    pub status: QueueStatus,
}

impl SyncQueueItem {
    /// New pending item. Ids are time-ordered (v7) so primary-key order on
    /// any engine agrees with creation order.
    pub fn new(
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            action,
            payload,
            created_at: Utc::now().to_rfc3339(),
            attempts: 0,
            last_attempt_at: None,
            error_message: None,
            status: QueueStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_starts_pending_with_zero_attempts() {
        let item = SyncQueueItem::new(
            EntityKind::Property,
            "p-1",
            SyncAction::Create,
            serde_json::json!({"id": "p-1"}),
        );
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_attempt_at.is_none());
        assert!(Uuid::parse_str(&item.id).is_ok());
    }

    #[test]
    fn queue_ids_are_time_ordered() {
        let first = SyncQueueItem::new(
            EntityKind::Property,
            "p-1",
            SyncAction::Create,
            Value::Null,
        );
        let second = SyncQueueItem::new(
            EntityKind::Property,
            "p-1",
            SyncAction::Update,
            Value::Null,
        );
        assert!(first.id < second.id);
    }

    #[test]
    fn status_serialization_matches_stored_contract() {
        let actual = [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ]
        .iter()
        .map(|status| serde_json::to_string(status).expect("serialize status"))
        .collect::<Vec<_>>();

        assert_eq!(
            actual,
            vec!["\"pending\"", "\"processing\"", "\"completed\"", "\"failed\""]
        );
    }

    #[test]
    fn queue_item_record_uses_camel_case_keys() {
        let item = SyncQueueItem::new(
            EntityKind::Evidence,
            "e-1",
            SyncAction::Update,
            serde_json::json!({"id": "e-1"}),
        );
        let record = serde_json::to_value(&item).expect("serialize item");
        assert_eq!(record["entityType"], "evidence");
        assert_eq!(record["entityId"], "e-1");
        assert!(record.get("createdAt").is_some());
        assert!(record.get("lastAttemptAt").is_some());
    }

    #[test]
    fn open_statuses_exclude_completed_only() {
        assert!(QueueStatus::Pending.is_open());
        assert!(QueueStatus::Processing.is_open());
        assert!(QueueStatus::Failed.is_open());
        assert!(!QueueStatus::Completed.is_open());
    }
}
