//! Offline-first field data store.
//!
//! This crate is the embedding surface: it picks a storage engine, wires the
//! repositories, sync queue, and drain engine together, and exposes one
//! [`Fieldbook`] handle the host app holds for its lifetime. Everything
//! observable (models, statuses, stats) is re-exported so embedders depend
//! on this crate alone.

mod config;
mod context;
mod errors;

pub use config::{BackendPreference, EngineConfig};
pub use context::Fieldbook;
pub use errors::FieldbookError;

pub use fieldbook_core::app_state::AppStateStore;
pub use fieldbook_core::errors::{RemoteError, RemoteRetryClass, StorageError};
pub use fieldbook_core::evidence::{
    Evidence, EvidenceMetadata, EvidencePatch, EvidenceRepository, EvidenceType, NewEvidence,
};
pub use fieldbook_core::inspections::{
    Inspection, InspectionPatch, InspectionRepository, InspectionStatus, NewInspection,
};
pub use fieldbook_core::properties::{
    BuildingInfo, NewProperty, Property, PropertyPatch, PropertyRepository,
};
pub use fieldbook_core::storage::BackendKind;
pub use fieldbook_core::sync::{
    DrainOutcome, DrainReport, EntityKind, EvidenceSyncStatus, QueueCounts, QueueStatus,
    SharedRemote, SyncAction, SyncEngine, SyncQueueItem, SyncQueueRepository, SyncStats,
    SyncStatsReader, SyncStatus, SyncTrigger,
};
