//! Error types shared across the engine.

use thiserror::Error;

use crate::storage::StoreTable;

/// Errors raised by the storage port and everything built on it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No offline-capable backend is available; callers must use the online path.
    #[error("offline storage unavailable: {0}")]
    Unavailable(String),

    /// A record addressed by id does not exist.
    #[error("{table} record not found: {id}")]
    NotFound { table: StoreTable, id: String },

    /// A payload blob failed validation at the repository boundary.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Record serialization/deserialization error.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fault reported by the concrete storage engine.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create a backend fault from an engine-specific error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create an unavailable error (degraded "no offline capability" mode).
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a payload validation error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Create a not-found error for a table/id pair.
    pub fn not_found(table: StoreTable, id: impl Into<String>) -> Self {
        Self::NotFound {
            table,
            id: id.into(),
        }
    }
}

/// Retry policy class for remote API failures. Used for logging and
/// diagnostics; the queue's attempt threshold owns actual retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors raised by the remote API port.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection, timeout, or other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success response from the remote API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The remote copy changed since this client's base revision.
    #[error("remote record changed since last sync")]
    Conflict { server_updated_at: Option<String> },

    /// Missing or invalid credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The request could not be built (missing required data, etc.).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    /// Create an API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RemoteRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RemoteRetryClass::ReauthRequired,
                408 | 423 | 425 | 429 => RemoteRetryClass::Retryable,
                500..=599 => RemoteRetryClass::Retryable,
                _ => RemoteRetryClass::Permanent,
            },
            Self::Transport(_) => RemoteRetryClass::Retryable,
            Self::Conflict { .. } => RemoteRetryClass::Permanent,
            Self::Json(_) => RemoteRetryClass::Permanent,
            Self::InvalidRequest(_) => RemoteRetryClass::Permanent,
            Self::Auth(_) => RemoteRetryClass::ReauthRequired,
        }
    }
}
