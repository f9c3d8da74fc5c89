//! Facade-level error type.

use thiserror::Error;

use fieldbook_core::StorageError;

/// Errors surfaced by the facade lifecycle and its pass-through calls.
#[derive(Debug, Error)]
pub enum FieldbookError {
    /// Initialization could not produce a working handle.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Storage fault bubbled up from a repository or the engine.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FieldbookError {
    /// Create an init error.
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }
}
