//! Evidence domain model: captured media (photo, thermal, document, voice
//! memo) attached to an inspection. Field-record sync and media upload are
//! tracked independently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StorageError;
use crate::sync::EvidenceSyncStatus;

/// Current schema for the evidence `metadata` blob.
pub const EVIDENCE_METADATA_SCHEMA_VERSION: u32 = 1;

/// Media uploads stop retrying once this many attempts have failed. Counted
/// separately from the queue's attempt counter.
pub const MAX_UPLOAD_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    #[default]
    Photo,
    Thermal,
    Document,
    VoiceMemo,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Photo => "photo",
            EvidenceType::Thermal => "thermal",
            EvidenceType::Document => "document",
            EvidenceType::VoiceMemo => "voice_memo",
        }
    }

    /// Content type used for the media upload when the metadata blob does
    /// not carry an explicit one.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            EvidenceType::Photo => "image/jpeg",
            EvidenceType::Thermal => "image/jpeg",
            EvidenceType::Document => "application/pdf",
            EvidenceType::VoiceMemo => "audio/mp4",
        }
    }
}

/// Versioned capture metadata. Unknown fields are preserved so newer
/// capture layers can stash extras without breaking older readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMetadata {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EvidenceMetadata {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.schema_version != EVIDENCE_METADATA_SCHEMA_VERSION {
            return Err(StorageError::invalid_payload(format!(
                "unsupported evidence metadata schemaVersion {} (supported: {})",
                self.schema_version, EVIDENCE_METADATA_SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

impl Default for EvidenceMetadata {
    fn default() -> Self {
        Self {
            schema_version: EVIDENCE_METADATA_SCHEMA_VERSION,
            file_name: None,
            mime_type: None,
            size_bytes: None,
            duration_secs: None,
            notes: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    pub server_id: Option<String>,
    /// Local id of the owning inspection.
    pub inspection_id: String,
    pub inspection_server_id: Option<String>,
    /// Step key within the inspection this capture belongs to.
    pub step: Option<String>,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    /// Path of the captured file on this device; uploads read from here.
    pub local_path: Option<String>,
    /// Set once the media upload succeeds.
    pub remote_url: Option<String>,
    pub metadata: Option<EvidenceMetadata>,
    pub captured_at: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub sync_status: EvidenceSyncStatus,
    pub upload_attempts: i32,
    pub local_updated_at: String,
}

impl Evidence {
    /// Content type for the media upload: explicit metadata wins, the
    /// evidence type's default otherwise.
    pub fn content_type(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.mime_type.as_deref())
            .unwrap_or_else(|| self.evidence_type.default_content_type())
    }

    /// File name for the media upload, falling back to the local id.
    pub fn upload_file_name(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.file_name.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvidence {
    pub inspection_id: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub metadata: Option<EvidenceMetadata>,
    /// Capture time from the camera layer; stamped at save when absent.
    #[serde(default)]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl NewEvidence {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.inspection_id.trim().is_empty() {
            return Err(StorageError::invalid_payload(
                "evidence inspectionId is required",
            ));
        }
        if let Some(metadata) = &self.metadata {
            metadata.validate()?;
        }
        validate_coordinates(self.latitude, self.longitude)?;
        Ok(())
    }
}

/// Partial update; the capture itself (type, file, geolocation) is immutable
/// after save, so only annotation fields are patchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EvidenceMetadata>,
}

impl EvidencePatch {
    pub fn is_empty(&self) -> bool {
        self.step.is_none() && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.is_empty() {
            return Err(StorageError::invalid_payload(
                "evidence update contains no fields",
            ));
        }
        if let Some(metadata) = &self.metadata {
            metadata.validate()?;
        }
        Ok(())
    }

    pub fn apply(&self, evidence: &mut Evidence) {
        if let Some(step) = &self.step {
            evidence.step = Some(step.clone());
        }
        if let Some(metadata) = &self.metadata {
            evidence.metadata = Some(metadata.clone());
        }
    }
}

fn validate_coordinates(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<(), StorageError> {
    if matches!(latitude, Some(lat) if !(-90.0..=90.0).contains(&lat)) {
        return Err(StorageError::invalid_payload(
            "evidence latitude out of range",
        ));
    }
    if matches!(longitude, Some(lon) if !(-180.0..=180.0).contains(&lon)) {
        return Err(StorageError::invalid_payload(
            "evidence longitude out of range",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Evidence {
        Evidence {
            id: "e-1".to_string(),
            server_id: None,
            inspection_id: "i-1".to_string(),
            inspection_server_id: None,
            step: Some("roof_access".to_string()),
            evidence_type: EvidenceType::Photo,
            local_path: Some("/data/captures/e-1.jpg".to_string()),
            remote_url: None,
            metadata: None,
            captured_at: "2026-07-01T09:30:00Z".to_string(),
            latitude: Some(47.61),
            longitude: Some(-122.33),
            sync_status: EvidenceSyncStatus::Pending,
            upload_attempts: 0,
            local_updated_at: "2026-07-01T09:30:00Z".to_string(),
        }
    }

    #[test]
    fn evidence_record_uses_camel_case_and_type_key() {
        let record = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(record["type"], "photo");
        assert_eq!(record["inspectionId"], "i-1");
        assert_eq!(record["localPath"], "/data/captures/e-1.jpg");
        assert_eq!(record["uploadAttempts"], 0);
        assert_eq!(record["syncStatus"], "pending");
    }

    #[test]
    fn content_type_prefers_metadata_over_type_default() {
        let mut evidence = sample();
        assert_eq!(evidence.content_type(), "image/jpeg");

        evidence.evidence_type = EvidenceType::VoiceMemo;
        assert_eq!(evidence.content_type(), "audio/mp4");

        evidence.metadata = Some(EvidenceMetadata {
            mime_type: Some("audio/wav".to_string()),
            ..EvidenceMetadata::default()
        });
        assert_eq!(evidence.content_type(), "audio/wav");
    }

    #[test]
    fn metadata_rejects_unsupported_schema_version() {
        let metadata = EvidenceMetadata {
            schema_version: 7,
            ..EvidenceMetadata::default()
        };
        assert!(matches!(
            metadata.validate(),
            Err(StorageError::InvalidPayload(_))
        ));
    }

    #[test]
    fn metadata_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "schemaVersion": 1,
            "fileName": "roof.jpg",
            "cameraModel": "XR-200"
        });
        let metadata: EvidenceMetadata = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(metadata.file_name.as_deref(), Some("roof.jpg"));
        assert_eq!(serde_json::to_value(&metadata).expect("serialize"), raw);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let new = NewEvidence {
            inspection_id: "i-1".to_string(),
            latitude: Some(123.0),
            ..NewEvidence::default()
        };
        assert!(matches!(
            new.validate(),
            Err(StorageError::InvalidPayload(_))
        ));
    }
}
