//! Embedded SQLite engine for the offline store (native platforms).
//!
//! Implements the core storage port over diesel with a single-writer actor;
//! see [`backend::SqliteBackend`].

pub mod backend;
pub mod db;
mod errors;
mod models;
pub mod schema;

pub use backend::SqliteBackend;
pub use errors::DriverError;
