//! Three-tier vector search coordination.
//!
//! Tier searches run in parallel; a tier returning an error is logged and
//! dropped rather than failing the query (availability over
//! completeness). Results merge by `item_id`, keeping the highest score,
//! with tier precedence breaking exact ties.

use super::{SearchResult, Tier, VectorStore};
use crate::error::SearchError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Coordinates project → user → registry vector stores.
///
/// Any tier may be absent: a missing project store just narrows the
/// search, and with no embedding configuration at all every tier is
/// `None` and searches return empty.
#[derive(Default, Clone)]
pub struct ThreeTierVectorManager {
    project: Option<Arc<dyn VectorStore>>,
    user: Option<Arc<dyn VectorStore>>,
    registry: Option<Arc<dyn VectorStore>>,
}

impl ThreeTierVectorManager {
    pub fn new(
        project: Option<Arc<dyn VectorStore>>,
        user: Option<Arc<dyn VectorStore>>,
        registry: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            project,
            user,
            registry,
        }
    }

    /// Whether any tier is configured.
    pub fn is_available(&self) -> bool {
        self.project.is_some() || self.user.is_some() || self.registry.is_some()
    }

    /// Searches all configured tiers in parallel and merges, abandoning
    /// the fan-out when `cancel` trips.
    pub async fn search_with_cancel(
        &self,
        query: &str,
        limit: usize,
        item_type: Option<&str>,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled),
            results = self.search(query, limit, item_type) => Ok(results),
        }
    }

    /// Searches all configured tiers in parallel and merges.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        item_type: Option<&str>,
    ) -> Vec<SearchResult> {
        let run =
            |store: Option<Arc<dyn VectorStore>>, tier: Tier| {
                let query = query.to_string();
                let item_type = item_type.map(str::to_string);
                async move {
                    match store {
                        Some(store) => {
                            match store.search(&query, limit, item_type.as_deref()).await {
                                Ok(hits) => hits,
                                Err(e) => {
                                    warn!(tier = tier.as_str(), error = %e, "tier search failed, dropping");
                                    Vec::new()
                                }
                            }
                        }
                        None => Vec::new(),
                    }
                }
            };

        let (project_hits, user_hits, registry_hits) = tokio::join!(
            run(self.project.clone(), Tier::Project),
            run(self.user.clone(), Tier::User),
            run(self.registry.clone(), Tier::Registry),
        );

        // Merge by item_id: highest score wins; a tie keeps the earlier
        // (higher-precedence) tier.
        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        for hit in project_hits
            .into_iter()
            .chain(user_hits)
            .chain(registry_hits)
        {
            match merged.get(&hit.item_id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    merged.insert(hit.item_id.clone(), hit);
                }
            }
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.source.cmp(&b.source))
        });
        results.truncate(limit);
        results
    }

    /// Stores an embedding in the named tier.
    pub async fn embed_and_store(
        &self,
        tier: Tier,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
        signature: Option<&str>,
    ) -> Result<bool, SearchError> {
        let store = match tier {
            Tier::Project => &self.project,
            Tier::User => &self.user,
            Tier::Registry => &self.registry,
        };
        match store {
            Some(store) => {
                store
                    .embed_and_store(item_id, item_type, content, metadata, signature)
                    .await
            }
            None => Err(SearchError::EmbedderUnavailable),
        }
    }

    /// Deletes an item's embedding from every configured tier. Returns
    /// true when at least one tier held it.
    pub async fn delete(&self, item_id: &str) -> bool {
        let mut any = false;
        for store in [&self.project, &self.user, &self.registry]
            .into_iter()
            .flatten()
        {
            match store.delete(item_id).await {
                Ok(deleted) => any |= deleted,
                Err(e) => warn!(item_id, error = %e, "tier delete failed"),
            }
        }
        any
    }
}

impl std::fmt::Debug for ThreeTierVectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreeTierVectorManager")
            .field("project", &self.project.is_some())
            .field("user", &self.user.is_some())
            .field("registry", &self.registry.is_some())
            .finish()
    }
}
