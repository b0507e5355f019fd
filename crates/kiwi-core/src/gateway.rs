//! Embedding gateway adapter.
//!
//! Bridges the registry crate's [`EmbeddingGateway`] contract onto the
//! search crate's validation-gated vector layer. Constructed at the edge
//! and passed into registries, which keeps the registry ↔ vector-store
//! dependency pointing one way.

use async_trait::async_trait;
use kiwi_registry::EmbeddingGateway;
use kiwi_search::{ThreeTierVectorManager, ValidationGatedEmbedding};
use serde_json::Value;

/// Gateway over the three-tier vector layer.
///
/// `refresh` embeds into the project tier through the validation gate;
/// `remove` sweeps every configured tier.
pub struct VectorGateway {
    gate: ValidationGatedEmbedding,
    manager: ThreeTierVectorManager,
}

impl VectorGateway {
    pub fn new(gate: ValidationGatedEmbedding, manager: ThreeTierVectorManager) -> Self {
        Self { gate, manager }
    }
}

#[async_trait]
impl EmbeddingGateway for VectorGateway {
    async fn refresh(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
    ) -> Result<bool, String> {
        self.gate
            .update_if_valid(item_id, item_type, content, metadata)
            .await
            .map_err(|e| e.to_string())
    }

    async fn remove(&self, item_id: &str) -> bool {
        self.manager.delete(item_id).await
    }
}

impl std::fmt::Debug for VectorGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorGateway").finish()
    }
}
