//! Evidence domain models and repository.

mod evidence_model;
mod evidence_repository;

pub use evidence_model::*;
pub use evidence_repository::*;
