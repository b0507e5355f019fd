//! Embedding provider contract and environment wiring.
//!
//! The model itself (HTTP service, local inference, anything) lives
//! outside the kernel. This module only defines the trait the stores
//! call and the environment variables that decide whether a vector tier
//! exists at all.

use crate::error::SearchError;
use async_trait::async_trait;

/// Produces embeddings for text. Implementations are supplied at the
/// edge; the kernel ships none.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds one text. Dimension must be stable across calls.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    /// Embedding dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// Connection settings read from the environment.
///
/// Absence of `EMBEDDING_URL` disables the vector tier rather than
/// failing the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Remote vector database endpoint, when a registry tier exists.
    pub vector_db_url: Option<String>,
}

impl EmbeddingConfig {
    /// Reads `EMBEDDING_URL`, `EMBEDDING_API_KEY`, `EMBEDDING_MODEL`,
    /// and `VECTOR_DB_URL`. Returns `None` when no embedding URL is
    /// configured.
    pub fn from_env() -> Option<Self> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Some(Self {
            url: non_empty("EMBEDDING_URL")?,
            api_key: non_empty("EMBEDDING_API_KEY"),
            model: non_empty("EMBEDDING_MODEL"),
            vector_db_url: non_empty("VECTOR_DB_URL"),
        })
    }
}
