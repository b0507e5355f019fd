//! Typed operation-family interfaces.
//!
//! The registries expose three capability traits instead of one wide
//! interface: search, CRUD, and graph (knowledge relationships). Each
//! registry implements only the families it offers.

use crate::backend::{ArtifactRecord, LinkEdge, VersionRow};
use crate::error::RegistryError;
use async_trait::async_trait;

/// A scored record hit from registry search.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHit {
    pub record: ArtifactRecord,
    pub score: f64,
}

/// Record search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RecordHit>, RegistryError>;
}

/// Record lifecycle.
#[async_trait]
pub trait CrudProvider: Send + Sync {
    async fn get(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<(ArtifactRecord, VersionRow), RegistryError>;

    async fn list(&self) -> Result<Vec<ArtifactRecord>, RegistryError>;

    async fn delete(&self, id: &str, cascade: bool) -> Result<usize, RegistryError>;
}

/// Directed relationships between artifacts.
#[async_trait]
pub trait GraphProvider: Send + Sync {
    async fn add_relationship(
        &self,
        from: &str,
        to: &str,
        relationship_type: &str,
    ) -> Result<(), RegistryError>;

    async fn relationships_of(&self, id: &str) -> Result<Vec<LinkEdge>, RegistryError>;
}
