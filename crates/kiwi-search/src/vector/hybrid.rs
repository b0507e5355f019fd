//! Hybrid re-ranking: semantic + keyword + recency.
//!
//! The manager supplies `2·limit` semantic candidates; each is re-scored
//! as `w_sem·score + w_kw·(matches/|terms|) + w_rec·recency`, where
//! recency is a flat 0.1 for local-tier hits and 0.05 otherwise. Weights
//! default to 0.7 / 0.2 / 0.1 and renormalize to sum 1.0 on update.

use super::manager::ThreeTierVectorManager;
use super::SearchResult;
use std::collections::HashSet;

const LOCAL_RECENCY: f32 = 0.1;
const REMOTE_RECENCY: f32 = 0.05;

/// Hybrid search over the three-tier manager.
#[derive(Debug, Clone)]
pub struct HybridSearch {
    manager: ThreeTierVectorManager,
    semantic_weight: f32,
    keyword_weight: f32,
    recency_weight: f32,
}

impl HybridSearch {
    pub fn new(manager: ThreeTierVectorManager) -> Self {
        Self {
            manager,
            semantic_weight: 0.7,
            keyword_weight: 0.2,
            recency_weight: 0.1,
        }
    }

    /// Current `(semantic, keyword, recency)` weights.
    pub fn weights(&self) -> (f32, f32, f32) {
        (self.semantic_weight, self.keyword_weight, self.recency_weight)
    }

    /// Replaces the weights, renormalizing so they sum to 1.0. A zero
    /// total leaves the current weights unchanged.
    pub fn update_weights(&mut self, semantic: f32, keyword: f32, recency: f32) {
        let total = semantic + keyword + recency;
        if total > 0.0 {
            self.semantic_weight = semantic / total;
            self.keyword_weight = keyword / total;
            self.recency_weight = recency / total;
        }
    }

    /// Searches and re-ranks.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        item_type: Option<&str>,
    ) -> Vec<SearchResult> {
        let mut candidates = self.manager.search(query, limit * 2, item_type).await;

        let terms: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        for hit in &mut candidates {
            let keyword_score = if terms.is_empty() {
                0.0
            } else {
                let content = hit.content_preview.to_lowercase();
                let matches = terms.iter().filter(|t| content.contains(*t)).count();
                matches as f32 / terms.len() as f32
            };
            let recency = if hit.source.is_local() {
                LOCAL_RECENCY
            } else {
                REMOTE_RECENCY
            };

            hit.score = self.semantic_weight * hit.score
                + self.keyword_weight * keyword_score
                + self.recency_weight * recency;
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        candidates
    }
}
