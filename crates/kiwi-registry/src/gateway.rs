//! Embedding gateway contract.
//!
//! Registries never talk to a vector store directly. They depend on this
//! trait; the concrete three-tier manager (wrapped in its validation
//! gate) implements it at the edge and is passed in at construction.

use async_trait::async_trait;
use serde_json::Value;

/// The slice of the vector layer registries need.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Creates or refreshes the embedding for an item. Implementations
    /// run validation-gated: a rejected artifact returns `Err` and writes
    /// nothing.
    async fn refresh(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
    ) -> Result<bool, String>;

    /// Removes an item's embedding from every tier it exists in.
    async fn remove(&self, item_id: &str) -> bool;
}
