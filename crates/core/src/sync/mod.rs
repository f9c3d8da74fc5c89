//! Sync domain: queue, drain engine, reconciliation, and status aggregation.

mod engine;
mod queue_repository;
mod reconcile;
mod remote;
mod scheduler;
mod stats;
mod sync_model;

pub use engine::*;
pub use queue_repository::*;
pub use reconcile::*;
pub use remote::*;
pub use scheduler::*;
pub use stats::*;
pub use sync_model::*;
