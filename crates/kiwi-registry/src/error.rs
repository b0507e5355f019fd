//! Error types for registry operations.

use thiserror::Error;

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The record or version does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Builtin artifacts cannot be deleted.
    #[error("'{0}' is a builtin and cannot be deleted")]
    BuiltinProtected(String),

    /// Delete refused because dependents exist and cascade was off.
    #[error("'{id}' has dependents: {dependents:?}. Pass cascade=true to delete them too")]
    HasDependents { id: String, dependents: Vec<String> },

    /// Persistence layer failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Remote registry or embedding service unavailable. Surfaced here;
    /// only the vector search path swallows these.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for RegistryError {
    fn from(e: sled::Error) -> Self {
        RegistryError::Backend(e.to_string())
    }
}
