//! Per-kind registry façades.

use crate::backend::{ArtifactRecord, LinkEdge, RegistryBackend, VersionRow};
use crate::error::RegistryError;
use crate::gateway::EmbeddingGateway;
use crate::providers::{CrudProvider, GraphProvider, RecordHit, SearchProvider};
use crate::relevance::{parse_search_query, relevance_score};
use async_trait::async_trait;
use chrono::Utc;
use kiwi_artifacts::ArtifactKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to publish one artifact version.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub executor_id: Option<String>,
    pub version: String,
    pub manifest: Value,
    /// Canonical integrity hash for this version.
    pub integrity: String,
    /// Content handed to the embedding gateway.
    pub content: String,
    pub changelog: Option<String>,
    /// Kind-specific extras stored on the record.
    pub extra: Value,
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub id: String,
    pub version: String,
    pub integrity: String,
    /// Whether the embedding refresh went through.
    pub embedded: bool,
}

/// Shared registry machinery. The per-kind types wrap this with their
/// kind tag and extra operations.
pub struct RegistryCore {
    kind: ArtifactKind,
    backend: Arc<dyn RegistryBackend>,
    gateway: Option<Arc<dyn EmbeddingGateway>>,
}

impl RegistryCore {
    pub fn new(
        kind: ArtifactKind,
        backend: Arc<dyn RegistryBackend>,
        gateway: Option<Arc<dyn EmbeddingGateway>>,
    ) -> Self {
        Self {
            kind,
            backend,
            gateway,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Publishes a version: the identity record is updated in place, any
    /// previous latest version row is demoted, the new row is inserted
    /// with its canonical integrity, then the embedding is refreshed.
    ///
    /// Embedding refresh failures surface as [`RegistryError::Transient`]
    /// after the rows are already durable; the caller may retry the
    /// refresh without republishing.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, RegistryError> {
        let now = Utc::now();
        let existing = self.backend.get_record(&request.id).await?;

        let record = ArtifactRecord {
            id: request.id.clone(),
            kind: self.kind,
            name: request.name.clone(),
            description: request.description.clone(),
            category: request.category.clone(),
            tags: request.tags.clone(),
            executor_id: request.executor_id.clone(),
            is_builtin: existing.as_ref().map_or(false, |r| r.is_builtin),
            latest_version: request.version.clone(),
            extra: request.extra.clone(),
            created_at: existing.as_ref().map_or(now, |r| r.created_at),
            updated_at: now,
        };
        self.backend.put_record(&record).await?;

        self.backend
            .insert_version(
                &request.id,
                &VersionRow {
                    version: request.version.clone(),
                    manifest: request.manifest.clone(),
                    integrity: request.integrity.clone(),
                    is_latest: true,
                    changelog: request.changelog.clone(),
                    created_at: now,
                },
            )
            .await?;
        info!(id = %request.id, version = %request.version, kind = %self.kind, "published");

        let embedded = match &self.gateway {
            Some(gateway) => {
                let metadata = serde_json::json!({
                    "category": request.category,
                    "tags": request.tags,
                    "version": request.version,
                });
                gateway
                    .refresh(&request.id, self.kind.as_str(), &request.content, &metadata)
                    .await
                    .map_err(RegistryError::Transient)?
            }
            None => false,
        };

        Ok(PublishReceipt {
            id: request.id,
            version: request.version,
            integrity: request.integrity,
            embedded,
        })
    }

    pub async fn get(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<(ArtifactRecord, VersionRow), RegistryError> {
        let record = self
            .backend
            .get_record(id)
            .await?
            .filter(|r| r.kind == self.kind)
            .ok_or_else(|| RegistryError::NotFound(format!("{} '{id}'", self.kind)))?;
        let row = self
            .backend
            .get_version(id, version)
            .await?
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "{} '{id}' version {}",
                    self.kind,
                    version.unwrap_or("latest")
                ))
            })?;
        Ok((record, row))
    }

    pub async fn list(&self) -> Result<Vec<ArtifactRecord>, RegistryError> {
        let mut records = self.backend.list_records(Some(self.kind)).await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RecordHit>, RegistryError> {
        let terms = parse_search_query(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<RecordHit> = self
            .backend
            .list_records(Some(self.kind))
            .await?
            .into_iter()
            .filter_map(|record| {
                let primary = if record.name.is_empty() {
                    &record.id
                } else {
                    &record.name
                };
                let score = relevance_score(&terms, primary, &record.description);
                (score > 0.0).then_some(RecordHit { record, score })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Deletes a record. With `cascade=false` the delete is refused when
    /// dependents exist; with `cascade=true` dependents go first.
    /// Builtins never delete. Returns the number of records removed.
    pub async fn delete(&self, id: &str, cascade: bool) -> Result<usize, RegistryError> {
        let record = self
            .backend
            .get_record(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("{} '{id}'", self.kind)))?;
        if record.is_builtin {
            return Err(RegistryError::BuiltinProtected(id.to_string()));
        }

        let dependents = self.backend.dependents_of(id).await?;
        let mut removed = 0usize;

        if !dependents.is_empty() {
            if !cascade {
                return Err(RegistryError::HasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
            for dependent in dependents {
                removed += Box::pin(self.delete(&dependent, true)).await?;
            }
        }

        if self.backend.delete_record(id).await? {
            removed += 1;
        }
        if let Some(gateway) = &self.gateway {
            gateway.remove(id).await;
        }
        debug!(id, removed, "deleted");
        Ok(removed)
    }
}

impl std::fmt::Debug for RegistryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCore").field("kind", &self.kind).finish()
    }
}

macro_rules! delegate_providers {
    ($registry:ident) => {
        #[async_trait]
        impl SearchProvider for $registry {
            async fn search(
                &self,
                query: &str,
                limit: usize,
            ) -> Result<Vec<RecordHit>, RegistryError> {
                self.core.search(query, limit).await
            }
        }

        #[async_trait]
        impl CrudProvider for $registry {
            async fn get(
                &self,
                id: &str,
                version: Option<&str>,
            ) -> Result<(ArtifactRecord, VersionRow), RegistryError> {
                self.core.get(id, version).await
            }

            async fn list(&self) -> Result<Vec<ArtifactRecord>, RegistryError> {
                self.core.list().await
            }

            async fn delete(&self, id: &str, cascade: bool) -> Result<usize, RegistryError> {
                self.core.delete(id, cascade).await
            }
        }
    };
}

/// Tool registry: CRUD + search + publish, with executor dependents
/// guarding deletes.
pub struct ToolRegistry {
    core: RegistryCore,
}

impl ToolRegistry {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        gateway: Option<Arc<dyn EmbeddingGateway>>,
    ) -> Self {
        Self {
            core: RegistryCore::new(ArtifactKind::Tool, backend, gateway),
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, RegistryError> {
        self.core.publish(request).await
    }
}

delegate_providers!(ToolRegistry);

/// Directive registry: CRUD + search + publish, plus links to the tools
/// a directive invokes.
pub struct DirectiveRegistry {
    core: RegistryCore,
}

impl DirectiveRegistry {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        gateway: Option<Arc<dyn EmbeddingGateway>>,
    ) -> Self {
        Self {
            core: RegistryCore::new(ArtifactKind::Directive, backend, gateway),
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, RegistryError> {
        self.core.publish(request).await
    }

    /// Records that a directive invokes a tool.
    pub async fn link_tool(&self, directive_id: &str, tool_id: &str) -> Result<(), RegistryError> {
        self.core
            .backend
            .add_link(&LinkEdge {
                from: directive_id.to_string(),
                to: tool_id.to_string(),
                link_type: "invokes".to_string(),
            })
            .await
    }

    pub async fn linked_tools(&self, directive_id: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .core
            .backend
            .links_of(directive_id)
            .await?
            .into_iter()
            .filter(|edge| edge.link_type == "invokes")
            .map(|edge| edge.to)
            .collect())
    }
}

delegate_providers!(DirectiveRegistry);

/// Knowledge registry: CRUD + search + publish, plus the zettel graph
/// (labeled relationships) and named collections.
pub struct KnowledgeRegistry {
    core: RegistryCore,
}

impl KnowledgeRegistry {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        gateway: Option<Arc<dyn EmbeddingGateway>>,
    ) -> Self {
        Self {
            core: RegistryCore::new(ArtifactKind::Knowledge, backend, gateway),
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, RegistryError> {
        self.core.publish(request).await
    }

    /// Adds a zettel to a named collection, stored on the record's extra
    /// data.
    pub async fn add_to_collection(
        &self,
        zettel_id: &str,
        collection: &str,
    ) -> Result<(), RegistryError> {
        let (mut record, _) = self.core.get(zettel_id, None).await?;

        let mut collections: Vec<String> = record
            .extra
            .get("collections")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !collections.iter().any(|c| c == collection) {
            collections.push(collection.to_string());
        }

        if !record.extra.is_object() {
            record.extra = serde_json::json!({});
        }
        record.extra["collections"] = serde_json::json!(collections);
        record.updated_at = Utc::now();
        self.core.backend.put_record(&record).await
    }

    pub async fn collections_of(&self, zettel_id: &str) -> Result<Vec<String>, RegistryError> {
        let (record, _) = self.core.get(zettel_id, None).await?;
        Ok(record
            .extra
            .get("collections")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

delegate_providers!(KnowledgeRegistry);

#[async_trait]
impl GraphProvider for KnowledgeRegistry {
    async fn add_relationship(
        &self,
        from: &str,
        to: &str,
        relationship_type: &str,
    ) -> Result<(), RegistryError> {
        self.core
            .backend
            .add_link(&LinkEdge {
                from: from.to_string(),
                to: to.to_string(),
                link_type: relationship_type.to_string(),
            })
            .await
    }

    async fn relationships_of(&self, id: &str) -> Result<Vec<LinkEdge>, RegistryError> {
        self.core.backend.links_of(id).await
    }
}
