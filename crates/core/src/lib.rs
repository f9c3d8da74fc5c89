//! Offline-first persistence and sync core for field inspection data.
//!
//! Everything here runs against the [`storage::StorageBackend`] port; the
//! concrete engines live in their own crates. Repositories pair every local
//! mutation with a durable queue item, and the [`sync::SyncEngine`] drains
//! that queue against a [`sync::RemoteApi`] when connectivity allows.

pub mod app_state;
pub mod errors;
pub mod evidence;
pub mod inspections;
pub mod properties;
pub mod storage;
pub mod sync;

pub use errors::{RemoteError, StorageError};
