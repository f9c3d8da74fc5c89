//! Inspection domain model: a step-driven walkthrough of one property.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StorageError;
use crate::sync::SyncStatus;

/// Current schema for the `stepData` blob.
pub const STEP_DATA_SCHEMA_VERSION: u32 = 1;

/// Versioned per-step answers. Step payloads themselves are opaque JSON
/// owned by the form layer; only the envelope is validated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepData {
    pub schema_version: u32,
    #[serde(default)]
    pub steps: Map<String, Value>,
}

impl StepData {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.schema_version != STEP_DATA_SCHEMA_VERSION {
            return Err(StorageError::invalid_payload(format!(
                "unsupported stepData schemaVersion {} (supported: {})",
                self.schema_version, STEP_DATA_SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

impl Default for StepData {
    fn default() -> Self {
        Self {
            schema_version: STEP_DATA_SCHEMA_VERSION,
            steps: Map::new(),
        }
    }
}

/// Workflow state of the walkthrough itself (independent of sync state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    InProgress,
    Completed,
}

impl InspectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionStatus::InProgress => "in_progress",
            InspectionStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: String,
    pub server_id: Option<String>,
    /// Local id of the owning property; stable even before either side syncs.
    pub property_id: String,
    /// Owning property's server id, filled in once known so payloads can
    /// carry both.
    pub property_server_id: Option<String>,
    pub current_step: i32,
    pub step_data: Option<StepData>,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub status: InspectionStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub sync_status: SyncStatus,
    pub local_updated_at: String,
    pub server_updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInspection {
    pub property_id: String,
    #[serde(default)]
    pub current_step: i32,
    #[serde(default)]
    pub step_data: Option<StepData>,
}

impl NewInspection {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.property_id.trim().is_empty() {
            return Err(StorageError::invalid_payload(
                "inspection propertyId is required",
            ));
        }
        if self.current_step < 0 {
            return Err(StorageError::invalid_payload(
                "inspection currentStep cannot be negative",
            ));
        }
        if let Some(data) = &self.step_data {
            data.validate()?;
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged. The serialized form
/// (set fields only) is the `update` queue payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<StepData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InspectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl InspectionPatch {
    pub fn is_empty(&self) -> bool {
        self.current_step.is_none()
            && self.step_data.is_none()
            && self.evidence_ids.is_none()
            && self.status.is_none()
            && self.completed_at.is_none()
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.is_empty() {
            return Err(StorageError::invalid_payload(
                "inspection update contains no fields",
            ));
        }
        if matches!(self.current_step, Some(step) if step < 0) {
            return Err(StorageError::invalid_payload(
                "inspection currentStep cannot be negative",
            ));
        }
        if let Some(data) = &self.step_data {
            data.validate()?;
        }
        Ok(())
    }

    pub fn apply(&self, inspection: &mut Inspection) {
        if let Some(step) = self.current_step {
            inspection.current_step = step;
        }
        if let Some(data) = &self.step_data {
            inspection.step_data = Some(data.clone());
        }
        if let Some(ids) = &self.evidence_ids {
            inspection.evidence_ids = ids.clone();
        }
        if let Some(status) = self.status {
            inspection.status = status;
        }
        if let Some(at) = &self.completed_at {
            inspection.completed_at = Some(at.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspection_record_uses_camel_case_keys() {
        let inspection = Inspection {
            id: "i-1".to_string(),
            server_id: None,
            property_id: "p-1".to_string(),
            property_server_id: None,
            current_step: 2,
            step_data: Some(StepData::default()),
            evidence_ids: vec!["e-1".to_string()],
            status: InspectionStatus::InProgress,
            started_at: "2026-07-01T09:00:00Z".to_string(),
            completed_at: None,
            sync_status: SyncStatus::Pending,
            local_updated_at: "2026-07-01T09:00:00Z".to_string(),
            server_updated_at: None,
        };
        let record = serde_json::to_value(&inspection).expect("serialize");
        assert_eq!(record["propertyId"], "p-1");
        assert_eq!(record["currentStep"], 2);
        assert_eq!(record["status"], "in_progress");
        assert_eq!(record["evidenceIds"][0], "e-1");
        assert_eq!(record["stepData"]["schemaVersion"], 1);
        assert_eq!(record["syncStatus"], "pending");
    }

    #[test]
    fn step_data_rejects_unsupported_schema_version() {
        let data = StepData {
            schema_version: 2,
            steps: Map::new(),
        };
        assert!(matches!(
            data.validate(),
            Err(StorageError::InvalidPayload(_))
        ));
    }

    #[test]
    fn step_payloads_stay_opaque_through_a_roundtrip() {
        let raw = serde_json::json!({
            "schemaVersion": 1,
            "steps": {
                "roof_access": { "ladderUsed": true, "notes": "north side" },
                "membrane": [1, 2, 3]
            }
        });
        let data: StepData = serde_json::from_value(raw.clone()).expect("deserialize");
        assert!(data.validate().is_ok());
        assert_eq!(serde_json::to_value(&data).expect("serialize"), raw);
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(matches!(
            InspectionPatch::default().validate(),
            Err(StorageError::InvalidPayload(_))
        ));
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = InspectionPatch {
            current_step: Some(4),
            ..InspectionPatch::default()
        };
        let payload = serde_json::to_value(&patch).expect("serialize");
        assert_eq!(payload["currentStep"], 4);
        assert!(payload.get("status").is_none());
        assert!(payload.get("stepData").is_none());
    }

    #[test]
    fn negative_step_cursor_is_rejected() {
        let new = NewInspection {
            property_id: "p-1".to_string(),
            current_step: -1,
            step_data: None,
        };
        assert!(matches!(
            new.validate(),
            Err(StorageError::InvalidPayload(_))
        ));
    }
}
