//! Property domain models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StorageError;
use crate::sync::SyncStatus;

/// Current `buildingInfo` blob schema version.
pub const BUILDING_INFO_SCHEMA_VERSION: u32 = 1;

/// Versioned building-summary blob. Unknown fields are preserved through
/// `extra` so records written by newer clients survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingInfo {
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floors: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_built: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub construction_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roof_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub square_footage: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildingInfo {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.schema_version != BUILDING_INFO_SCHEMA_VERSION {
            return Err(StorageError::invalid_payload(format!(
                "unsupported buildingInfo schemaVersion {} (supported: {})",
                self.schema_version, BUILDING_INFO_SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

impl Default for BuildingInfo {
    fn default() -> Self {
        Self {
            schema_version: BUILDING_INFO_SCHEMA_VERSION,
            floors: None,
            year_built: None,
            construction_type: None,
            roof_type: None,
            square_footage: None,
            extra: Map::new(),
        }
    }
}

/// A property as stored locally. The camelCase serialization of this struct
/// is the backend record and the sync payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    pub server_id: Option<String>,
    pub project_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub building_info: Option<BuildingInfo>,
    pub roof_system_details: Option<String>,
    pub image_url: Option<String>,
    pub overall_condition: Option<String>,
    pub last_inspection_date: Option<String>,
    pub user_id: Option<String>,
    pub sync_status: SyncStatus,
    pub local_updated_at: String,
    pub server_updated_at: Option<String>,
}

/// Input for creating a property. Local id, timestamps, and sync status are
/// assigned by the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub building_info: Option<BuildingInfo>,
    #[serde(default)]
    pub roof_system_details: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub overall_condition: Option<String>,
    #[serde(default)]
    pub last_inspection_date: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl NewProperty {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.name.trim().is_empty() {
            return Err(StorageError::invalid_payload("property name is required"));
        }
        if let Some(info) = &self.building_info {
            info.validate()?;
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged. The serialized form
/// (set fields only) is the `update` queue payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_info: Option<BuildingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roof_system_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_inspection_date: Option<String>,
}

impl PropertyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.project_id.is_none()
            && self.building_info.is_none()
            && self.roof_system_details.is_none()
            && self.image_url.is_none()
            && self.overall_condition.is_none()
            && self.last_inspection_date.is_none()
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.is_empty() {
            return Err(StorageError::invalid_payload(
                "property update contains no fields",
            ));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(StorageError::invalid_payload(
                "property name cannot be blank",
            ));
        }
        if let Some(info) = &self.building_info {
            info.validate()?;
        }
        Ok(())
    }

    pub fn apply(&self, property: &mut Property) {
        if let Some(name) = &self.name {
            property.name = name.clone();
        }
        if let Some(address) = &self.address {
            property.address = Some(address.clone());
        }
        if let Some(project_id) = &self.project_id {
            property.project_id = Some(project_id.clone());
        }
        if let Some(building_info) = &self.building_info {
            property.building_info = Some(building_info.clone());
        }
        if let Some(details) = &self.roof_system_details {
            property.roof_system_details = Some(details.clone());
        }
        if let Some(image_url) = &self.image_url {
            property.image_url = Some(image_url.clone());
        }
        if let Some(condition) = &self.overall_condition {
            property.overall_condition = Some(condition.clone());
        }
        if let Some(date) = &self.last_inspection_date {
            property.last_inspection_date = Some(date.clone());
        }
    }
}
