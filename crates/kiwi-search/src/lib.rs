//! # Content-Addressed Search
//!
//! Two engines feed the kernel's search surface:
//!
//! - a **BM25 keyword index** with per-field weights, a phrase-match
//!   bonus, and an IDF cache ([`KeywordSearchEngine`]);
//! - an **embedding-backed vector layer**: SQLite-persisted stores per
//!   tier, a three-tier manager that fans out in parallel, and a hybrid
//!   re-ranker blending semantic, keyword, and recency signals.
//!
//! Only signed artifacts become searchable: `embed_and_store` runs behind
//! a validation gate ([`ValidationGatedEmbedding`]), so a failed
//! validation writes nothing.
//!
//! The embedding model itself is an external collaborator behind the
//! [`EmbeddingProvider`] trait; when its environment configuration is
//! absent the vector tier is disabled rather than failing the kernel.

mod error;
mod keyword;
pub mod vector;

pub use error::SearchError;
pub use keyword::{KeywordHit, KeywordSearchEngine, BM25_B, BM25_K1};
pub use vector::embedding::{EmbeddingConfig, EmbeddingProvider};
pub use vector::hybrid::HybridSearch;
pub use vector::manager::ThreeTierVectorManager;
pub use vector::pipeline::{ArtifactValidator, ValidationGatedEmbedding, ValidationVerdict};
pub use vector::sqlite::SqliteVectorStore;
pub use vector::{EmbeddingRecord, SearchResult, Tier, VectorStore};

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
