//! Embedding persistence and semantic search.

pub mod embedding;
pub mod hybrid;
pub mod manager;
pub mod pipeline;
pub mod sqlite;

use crate::error::SearchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum stored content length per embedding record.
pub const MAX_CONTENT_LEN: usize = 2048;
/// Maximum preview length on search results.
pub const MAX_PREVIEW_LEN: usize = 200;

/// Which tier a result came from. Ties in score break by tier order:
/// project over user over registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Project,
    User,
    Registry,
}

impl Tier {
    /// Project and user tiers are local to this machine.
    pub fn is_local(&self) -> bool {
        matches!(self, Tier::Project | Tier::User)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Project => "project",
            Tier::User => "user",
            Tier::Registry => "registry",
        }
    }
}

/// One persisted embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub item_id: String,
    pub item_type: String,
    pub embedding: Vec<f32>,
    /// Source content, truncated to [`MAX_CONTENT_LEN`].
    pub content: String,
    pub metadata: Value,
    pub validated_at: DateTime<Utc>,
    pub signature: Option<String>,
}

/// One scored semantic hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub item_id: String,
    pub item_type: String,
    pub score: f32,
    /// At most [`MAX_PREVIEW_LEN`] characters of the stored content.
    pub content_preview: String,
    pub metadata: Value,
    pub source: Tier,
}

/// Common interface over the per-tier embedding stores.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embeds `content` and persists the record. The embedding is
    /// normalized to unit length before storage.
    async fn embed_and_store(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
        signature: Option<&str>,
    ) -> Result<bool, SearchError>;

    /// Cosine-similarity search.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        item_type: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError>;

    async fn delete(&self, item_id: &str) -> Result<bool, SearchError>;

    /// Re-embeds content for an existing record, preserving its stored
    /// `item_type`. Returns false when the record does not exist.
    async fn update(&self, item_id: &str, content: &str, metadata: &Value)
        -> Result<bool, SearchError>;

    async fn exists(&self, item_id: &str) -> Result<bool, SearchError>;
}

/// Scales a vector to unit length. Zero vectors pass through unchanged.
pub(crate) fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product; equals cosine similarity for unit-length inputs.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
