//! Property domain models and repository.

mod properties_model;
mod properties_repository;

pub use properties_model::*;
pub use properties_repository::*;
