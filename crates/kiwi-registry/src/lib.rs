//! # Artifact Registries
//!
//! Per-kind façades over record and version-row persistence, composing
//! parsing, canonical hashing, and embedding refresh into the
//! create / publish / get / search / delete lifecycle.
//!
//! ## Architecture
//!
//! ```text
//!   ┌───────────────┐  ┌────────────────┐  ┌───────────────────┐
//!   │ ToolRegistry  │  │ DirectiveReg.  │  │ KnowledgeRegistry │
//!   └───────┬───────┘  └───────┬────────┘  └─────────┬─────────┘
//!           └───────────┬──────┴─────────────────────┘
//!                       ▼
//!               ┌───────────────┐      ┌──────────────────┐
//!               │ RegistryCore  │ ───► │ EmbeddingGateway │
//!               └───────┬───────┘      └──────────────────┘
//!                       ▼
//!               ┌────────────────┐
//!               │ RegistryBackend│  (sled locally; HTTP adapter
//!               └────────────────┘   is an external collaborator)
//! ```
//!
//! Registries depend on contracts, not concretions: the
//! [`RegistryBackend`] trait hides persistence, and the
//! [`EmbeddingGateway`] trait hides the vector layer, so the handler ↔
//! vector-store reference cycle of naive layering cannot form.
//!
//! Operation families are split per capability: [`SearchProvider`],
//! [`CrudProvider`], and [`GraphProvider`] (knowledge relationships),
//! each registry implementing only what it offers.

mod backend;
mod error;
mod gateway;
mod providers;
mod registries;
mod relevance;

pub use backend::{ArtifactRecord, LinkEdge, RegistryBackend, SledRegistryBackend, VersionRow};
pub use error::RegistryError;
pub use gateway::EmbeddingGateway;
pub use providers::{CrudProvider, GraphProvider, RecordHit, SearchProvider};
pub use registries::{
    DirectiveRegistry, KnowledgeRegistry, PublishRequest, PublishReceipt, RegistryCore,
    ToolRegistry,
};
pub use relevance::{parse_search_query, relevance_score};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
