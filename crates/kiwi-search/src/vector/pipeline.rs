//! Validation-gated embedding.
//!
//! An artifact becomes searchable only after it passes kind-specific
//! validation: a failed validation short-circuits with a typed error and
//! writes nothing. With no validator configured, content embeds directly
//! (read-side tooling that indexes already-signed artifacts).

use super::VectorStore;
use crate::error::SearchError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Verdict from the kind-specific validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub error: Option<String>,
    /// Signature produced by a validating sign pass, stored alongside the
    /// embedding when present.
    pub signature: Option<String>,
}

/// Validates content before it may be embedded.
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    async fn validate(&self, content: &str, item_type: &str) -> ValidationVerdict;
}

/// Gate in front of a [`VectorStore`].
pub struct ValidationGatedEmbedding {
    store: Arc<dyn VectorStore>,
    validator: Option<Arc<dyn ArtifactValidator>>,
}

impl ValidationGatedEmbedding {
    pub fn new(store: Arc<dyn VectorStore>, validator: Option<Arc<dyn ArtifactValidator>>) -> Self {
        Self { store, validator }
    }

    /// Validates, then embeds. Returns [`SearchError::ValidationRejected`]
    /// without touching the store when validation fails.
    pub async fn embed_if_valid(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
    ) -> Result<bool, SearchError> {
        let signature = match &self.validator {
            None => None,
            Some(validator) => {
                let verdict = validator.validate(content, item_type).await;
                if !verdict.valid {
                    return Err(SearchError::ValidationRejected(
                        verdict.error.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                verdict.signature
            }
        };

        self.store
            .embed_and_store(item_id, item_type, content, metadata, signature.as_deref())
            .await
    }

    /// Re-validates and re-embeds. Same gate as [`Self::embed_if_valid`].
    pub async fn update_if_valid(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
    ) -> Result<bool, SearchError> {
        self.embed_if_valid(item_id, item_type, content, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::sqlite::tests::store;
    use crate::vector::Tier;

    struct RejectUnsigned;

    #[async_trait]
    impl ArtifactValidator for RejectUnsigned {
        async fn validate(&self, content: &str, _item_type: &str) -> ValidationVerdict {
            if content.contains("kiwi-mcp:validated") {
                ValidationVerdict {
                    valid: true,
                    error: None,
                    signature: Some("sig".to_string()),
                }
            } else {
                ValidationVerdict {
                    valid: false,
                    error: Some("unsigned artifact".to_string()),
                    signature: None,
                }
            }
        }
    }

    #[tokio::test]
    async fn test_rejection_writes_nothing() {
        let (_dir, sqlite) = store(Tier::Project);
        let sqlite = Arc::new(sqlite);
        let gate = ValidationGatedEmbedding::new(sqlite.clone(), Some(Arc::new(RejectUnsigned)));

        let err = gate
            .embed_if_valid("doc", "knowledge", "no signature here", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ValidationRejected(_)));
        assert!(!sqlite.exists("doc").await.unwrap());
    }

    #[tokio::test]
    async fn test_valid_content_embedded_once() {
        let (_dir, sqlite) = store(Tier::Project);
        let sqlite = Arc::new(sqlite);
        let gate = ValidationGatedEmbedding::new(sqlite.clone(), Some(Arc::new(RejectUnsigned)));

        let content = "body\n<!-- kiwi-mcp:validated:abc:SIGNATURE:doc -->";
        assert!(gate
            .embed_if_valid("doc", "knowledge", content, &Value::Null)
            .await
            .unwrap());
        assert!(sqlite.exists("doc").await.unwrap());

        // Re-embedding the same id upserts, it does not duplicate.
        gate.update_if_valid("doc", "knowledge", content, &Value::Null)
            .await
            .unwrap();
        let hits = sqlite.search("body", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_no_validator_passes_through() {
        let (_dir, sqlite) = store(Tier::Project);
        let sqlite = Arc::new(sqlite);
        let gate = ValidationGatedEmbedding::new(sqlite.clone(), None);

        assert!(gate
            .embed_if_valid("doc", "tool", "anything", &Value::Null)
            .await
            .unwrap());
        assert!(sqlite.exists("doc").await.unwrap());
    }
}
