//! Registry record persistence.
//!
//! Three namespaces back the registries:
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `records` | artifact id | serialized [`ArtifactRecord`] | identity rows |
//! | `versions` | `{id}@{version}` | serialized [`VersionRow`] | version rows |
//! | `links` | `{from}\x1f{to}\x1f{type}` | serialized [`LinkEdge`] | graph edges |
//!
//! The sled implementation serves the local tiers and tests; the remote
//! HTTP adapter implements the same trait outside this crate.

use crate::error::RegistryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiwi_artifacts::ArtifactKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

const RECORD_TREE: &str = "records";
const VERSION_TREE: &str = "versions";
const LINK_TREE: &str = "links";

const LINK_SEP: char = '\x1f';

/// Identity row for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Executor reference for tools; `None` elsewhere and on primitives.
    pub executor_id: Option<String>,
    /// Builtins are un-deletable.
    #[serde(default)]
    pub is_builtin: bool,
    pub latest_version: String,
    /// Kind-specific extras (e.g. knowledge collections).
    #[serde(default)]
    pub extra: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One published version of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRow {
    pub version: String,
    pub manifest: Value,
    /// Canonical integrity hash of this version.
    pub integrity: String,
    pub is_latest: bool,
    pub changelog: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A directed, labeled edge between artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub from: String,
    pub to: String,
    pub link_type: String,
}

/// Persistence contract behind every registry.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<ArtifactRecord>, RegistryError>;

    async fn put_record(&self, record: &ArtifactRecord) -> Result<(), RegistryError>;

    /// Removes the record, its version rows, and its outgoing links.
    async fn delete_record(&self, id: &str) -> Result<bool, RegistryError>;

    async fn list_records(
        &self,
        kind: Option<ArtifactKind>,
    ) -> Result<Vec<ArtifactRecord>, RegistryError>;

    /// `None` version means the latest row.
    async fn get_version(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<VersionRow>, RegistryError>;

    async fn list_versions(&self, id: &str) -> Result<Vec<VersionRow>, RegistryError>;

    /// Inserts a version row as latest, marking every prior row for this
    /// id non-latest.
    async fn insert_version(&self, id: &str, row: &VersionRow) -> Result<(), RegistryError>;

    /// Records whose `executor_id` references `id`.
    async fn dependents_of(&self, id: &str) -> Result<Vec<String>, RegistryError>;

    async fn add_link(&self, edge: &LinkEdge) -> Result<(), RegistryError>;

    async fn links_of(&self, id: &str) -> Result<Vec<LinkEdge>, RegistryError>;
}

/// Sled-backed local registry store.
#[derive(Clone)]
pub struct SledRegistryBackend {
    records: sled::Tree,
    versions: sled::Tree,
    links: sled::Tree,
}

impl SledRegistryBackend {
    /// Opens or creates the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Temporary in-memory backend for tests.
    pub fn temporary() -> Result<Self, RegistryError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, RegistryError> {
        Ok(Self {
            records: db.open_tree(RECORD_TREE)?,
            versions: db.open_tree(VERSION_TREE)?,
            links: db.open_tree(LINK_TREE)?,
        })
    }

    fn version_key(id: &str, version: &str) -> String {
        format!("{id}@{version}")
    }

    fn version_prefix(id: &str) -> String {
        format!("{id}@")
    }
}

#[async_trait]
impl RegistryBackend for SledRegistryBackend {
    async fn get_record(&self, id: &str) -> Result<Option<ArtifactRecord>, RegistryError> {
        match self.records.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: &ArtifactRecord) -> Result<(), RegistryError> {
        self.records
            .insert(record.id.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RegistryError> {
        let existed = self.records.remove(id.as_bytes())?.is_some();

        let version_keys: Vec<sled::IVec> = self
            .versions
            .scan_prefix(Self::version_prefix(id).as_bytes())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in version_keys {
            self.versions.remove(key)?;
        }

        let link_keys: Vec<sled::IVec> = self
            .links
            .scan_prefix(format!("{id}{LINK_SEP}").as_bytes())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in link_keys {
            self.links.remove(key)?;
        }

        Ok(existed)
    }

    async fn list_records(
        &self,
        kind: Option<ArtifactKind>,
    ) -> Result<Vec<ArtifactRecord>, RegistryError> {
        let mut records = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            let record: ArtifactRecord = serde_json::from_slice(&bytes)?;
            if kind.map_or(true, |k| record.kind == k) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn get_version(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<VersionRow>, RegistryError> {
        match version {
            Some(v) => match self.versions.get(Self::version_key(id, v).as_bytes())? {
                Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                None => Ok(None),
            },
            None => {
                let rows = self.list_versions(id).await?;
                Ok(rows.into_iter().find(|r| r.is_latest))
            }
        }
    }

    async fn list_versions(&self, id: &str) -> Result<Vec<VersionRow>, RegistryError> {
        let mut rows = Vec::new();
        for entry in self.versions.scan_prefix(Self::version_prefix(id).as_bytes()) {
            let (_, bytes) = entry?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        rows.sort_by(|a: &VersionRow, b: &VersionRow| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn insert_version(&self, id: &str, row: &VersionRow) -> Result<(), RegistryError> {
        // Demote prior latest rows first; the new row becomes the only
        // latest for this id.
        for entry in self.versions.scan_prefix(Self::version_prefix(id).as_bytes()) {
            let (key, bytes) = entry?;
            let mut existing: VersionRow = serde_json::from_slice(&bytes)?;
            if existing.is_latest {
                existing.is_latest = false;
                self.versions.insert(key, serde_json::to_vec(&existing)?)?;
            }
        }

        let mut row = row.clone();
        row.is_latest = true;
        self.versions.insert(
            Self::version_key(id, &row.version).as_bytes(),
            serde_json::to_vec(&row)?,
        )?;
        Ok(())
    }

    async fn dependents_of(&self, id: &str) -> Result<Vec<String>, RegistryError> {
        let mut dependents = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            let record: ArtifactRecord = serde_json::from_slice(&bytes)?;
            if record.executor_id.as_deref() == Some(id) {
                dependents.push(record.id);
            }
        }
        Ok(dependents)
    }

    async fn add_link(&self, edge: &LinkEdge) -> Result<(), RegistryError> {
        let key = format!("{}{LINK_SEP}{}{LINK_SEP}{}", edge.from, edge.to, edge.link_type);
        self.links.insert(key.as_bytes(), serde_json::to_vec(edge)?)?;
        Ok(())
    }

    async fn links_of(&self, id: &str) -> Result<Vec<LinkEdge>, RegistryError> {
        let mut edges = Vec::new();
        for entry in self.links.scan_prefix(format!("{id}{LINK_SEP}").as_bytes()) {
            let (_, bytes) = entry?;
            edges.push(serde_json::from_slice(&bytes)?);
        }
        Ok(edges)
    }
}

impl std::fmt::Debug for SledRegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledRegistryBackend")
            .field("records", &self.records.len())
            .field("versions", &self.versions.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn record(id: &str, kind: ArtifactKind, executor: Option<&str>) -> ArtifactRecord {
        let now = Utc::now();
        ArtifactRecord {
            id: id.to_string(),
            kind,
            name: id.replace('_', " "),
            description: format!("{id} description"),
            category: String::new(),
            tags: Vec::new(),
            executor_id: executor.map(str::to_string),
            is_builtin: false,
            latest_version: "1.0.0".to_string(),
            extra: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn version(v: &str) -> VersionRow {
        VersionRow {
            version: v.to_string(),
            manifest: json!({"name": "x"}),
            integrity: "0".repeat(64),
            is_latest: true,
            changelog: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let backend = SledRegistryBackend::temporary().unwrap();
        let rec = record("hello_node", ArtifactKind::Tool, Some("node_runtime"));

        backend.put_record(&rec).await.unwrap();
        let loaded = backend.get_record("hello_node").await.unwrap().unwrap();
        assert_eq!(loaded, rec);

        assert!(backend.get_record("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_version_flips_latest() {
        let backend = SledRegistryBackend::temporary().unwrap();
        backend.insert_version("t", &version("1.0.0")).await.unwrap();
        backend.insert_version("t", &version("1.1.0")).await.unwrap();

        let rows = backend.list_versions("t").await.unwrap();
        assert_eq!(rows.len(), 2);
        let latest: Vec<&VersionRow> = rows.iter().filter(|r| r.is_latest).collect();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, "1.1.0");

        let fetched = backend.get_version("t", None).await.unwrap().unwrap();
        assert_eq!(fetched.version, "1.1.0");
        let pinned = backend.get_version("t", Some("1.0.0")).await.unwrap().unwrap();
        assert!(!pinned.is_latest);
    }

    #[tokio::test]
    async fn test_version_prefix_isolation() {
        let backend = SledRegistryBackend::temporary().unwrap();
        backend.insert_version("tool", &version("1.0.0")).await.unwrap();
        backend
            .insert_version("tool_extended", &version("2.0.0"))
            .await
            .unwrap();

        let rows = backend.list_versions("tool").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, "1.0.0");
    }

    #[tokio::test]
    async fn test_delete_cascades_versions_and_links() {
        let backend = SledRegistryBackend::temporary().unwrap();
        backend
            .put_record(&record("t", ArtifactKind::Tool, None))
            .await
            .unwrap();
        backend.insert_version("t", &version("1.0.0")).await.unwrap();
        backend
            .add_link(&LinkEdge {
                from: "t".to_string(),
                to: "other".to_string(),
                link_type: "extends".to_string(),
            })
            .await
            .unwrap();

        assert!(backend.delete_record("t").await.unwrap());
        assert!(backend.get_record("t").await.unwrap().is_none());
        assert!(backend.list_versions("t").await.unwrap().is_empty());
        assert!(backend.links_of("t").await.unwrap().is_empty());

        assert!(!backend.delete_record("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_dependents() {
        let backend = SledRegistryBackend::temporary().unwrap();
        backend
            .put_record(&record("runtime", ArtifactKind::Tool, Some("subprocess")))
            .await
            .unwrap();
        backend
            .put_record(&record("leaf_a", ArtifactKind::Tool, Some("runtime")))
            .await
            .unwrap();
        backend
            .put_record(&record("leaf_b", ArtifactKind::Tool, Some("runtime")))
            .await
            .unwrap();

        let mut dependents = backend.dependents_of("runtime").await.unwrap();
        dependents.sort();
        assert_eq!(dependents, vec!["leaf_a", "leaf_b"]);
        assert!(backend.dependents_of("leaf_a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_records_by_kind() {
        let backend = SledRegistryBackend::temporary().unwrap();
        backend
            .put_record(&record("t", ArtifactKind::Tool, None))
            .await
            .unwrap();
        backend
            .put_record(&record("k", ArtifactKind::Knowledge, None))
            .await
            .unwrap();

        assert_eq!(backend.list_records(None).await.unwrap().len(), 2);
        let tools = backend.list_records(Some(ArtifactKind::Tool)).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].id, "t");
    }
}
