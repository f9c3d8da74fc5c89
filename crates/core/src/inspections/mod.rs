//! Inspection domain models and repository.

mod inspections_model;
mod inspections_repository;

pub use inspections_model::*;
pub use inspections_repository::*;
