//! Remote-API port the engine drains against. The HTTP implementation
//! lives in its own crate; tests script this trait directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RemoteError;
use crate::sync::EntityKind;

/// Acknowledgement for entity create/update calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAck {
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<String>,
}

/// Acknowledgement for evidence media uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAck {
    pub remote_url: String,
}

/// One evidence media upload. Bytes are read from the capture file just
/// before the call; identities ride along so the remote can key the upload
/// even when the client never saw a create acknowledgement.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub evidence_local_id: String,
    pub inspection_local_id: String,
    pub inspection_server_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Create/update/delete plus the media path. Calls must be idempotent keyed
/// by local id; the client performs no internal retries (the queue's attempt
/// policy owns retry).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        payload: &Value,
    ) -> Result<RemoteAck, RemoteError>;

    async fn update_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        server_id: Option<&str>,
        payload: &Value,
    ) -> Result<RemoteAck, RemoteError>;

    async fn delete_entity(
        &self,
        entity_type: EntityKind,
        local_id: &str,
        server_id: Option<&str>,
    ) -> Result<(), RemoteError>;

    async fn upload_evidence_media(&self, upload: MediaUpload) -> Result<MediaAck, RemoteError>;
}

pub type SharedRemote = Arc<dyn RemoteApi>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_deserializes_from_camel_case_body() {
        let ack: RemoteAck = serde_json::from_value(serde_json::json!({
            "serverId": "srv-12",
            "serverUpdatedAt": "2026-07-01T10:00:00Z"
        }))
        .expect("deserialize ack");
        assert_eq!(ack.server_id, "srv-12");
        assert_eq!(ack.server_updated_at.as_deref(), Some("2026-07-01T10:00:00Z"));

        let bare: RemoteAck = serde_json::from_value(serde_json::json!({ "serverId": "srv-13" }))
            .expect("deserialize bare ack");
        assert!(bare.server_updated_at.is_none());
    }
}
