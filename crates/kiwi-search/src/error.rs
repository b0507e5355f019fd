//! Error types for search operations.

use thiserror::Error;

/// Errors raised by the search layer.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The embedding provider is not configured for this tier.
    #[error("Embedding provider not configured")]
    EmbedderUnavailable,

    /// The embedding backend answered but failed. The vector manager
    /// swallows these per tier to keep search answering.
    #[error("Transient embedding/search failure: {0}")]
    Transient(String),

    /// Validation rejected the artifact; nothing was embedded.
    #[error("Validation failed: {0}")]
    ValidationRejected(String),

    /// The operation was cooperatively cancelled; no partial results.
    #[error("Cancelled")]
    Cancelled,

    /// Local vector database failure.
    #[error("Vector store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
