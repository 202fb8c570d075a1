//! Error types for the adapter.

use crate::types::{Identifier, WatchKey};
use thiserror::Error;

/// Main error type for adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The request descriptor could not be bound to a collection.
    #[error("Cannot bind '{model}': {reason}")]
    Binding { model: String, reason: String },

    #[error("Record not found: {model}/{id}")]
    NotFound { model: String, id: Identifier },

    #[error("Record already exists: {model}/{id}")]
    Conflict { model: String, id: Identifier },

    /// Transport-level failure reported by the backend.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Subscription already registered: {0}")]
    AlreadyRegistered(WatchKey),

    /// The adapter's subscriptions were torn down.
    #[error("Adapter is shut down")]
    Shutdown,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn binding(model: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::Binding {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(model: impl Into<String>, id: Identifier) -> Self {
        AdapterError::NotFound {
            model: model.into(),
            id,
        }
    }

    /// Whether this failure came from the transport rather than the data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AdapterError::BackendUnavailable(_))
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Serialization(e.to_string())
    }
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
