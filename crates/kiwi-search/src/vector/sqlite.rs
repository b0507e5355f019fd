//! SQLite-backed vector store.
//!
//! Embeddings persist as binary little-endian f32 arrays in a single
//! `embeddings` table; similarity search unpacks candidates and scores
//! them with a dot product over unit-normalized vectors. A small `meta`
//! table tracks the embedding model the collection was built with.

use super::embedding::EmbeddingProvider;
use super::{dot, normalize, SearchResult, Tier, VectorStore, MAX_CONTENT_LEN, MAX_PREVIEW_LEN};
use crate::error::SearchError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File-backed vector store for one tier and collection.
pub struct SqliteVectorStore {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
    tier: Tier,
}

impl SqliteVectorStore {
    /// Opens (or creates) `{storage_path}/{collection}.db`.
    pub fn open(
        storage_path: &Path,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
        tier: Tier,
    ) -> Result<Self, SearchError> {
        std::fs::create_dir_all(storage_path)
            .map_err(|e| SearchError::Transient(e.to_string()))?;
        let db_path = storage_path.join(format!("{collection}.db"));
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS embeddings (
                item_id TEXT PRIMARY KEY,
                item_type TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT,
                signature TEXT,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_item_type ON embeddings(item_type);
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );",
        )?;

        debug!(path = %db_path.display(), tier = tier.as_str(), "vector store opened");
        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
            embedder,
            tier,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `(total, per-type)` record counts.
    pub fn stats(&self) -> Result<(usize, Vec<(String, usize)>), SearchError> {
        let conn = self.conn.lock();
        let total: usize =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT item_type, COUNT(*) FROM embeddings GROUP BY item_type")?;
        let by_type = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((total, by_type))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn embed_and_store(
        &self,
        item_id: &str,
        item_type: &str,
        content: &str,
        metadata: &Value,
        signature: Option<&str>,
    ) -> Result<bool, SearchError> {
        let mut embedding = self.embedder.embed(content).await?;
        normalize(&mut embedding);

        let stored_content: String = content.chars().take(MAX_CONTENT_LEN).collect();
        let now = Utc::now().to_rfc3339();
        let metadata_json = serde_json::to_string(metadata)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings
             (item_id, item_type, content, metadata_json, signature, embedding, dimension, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item_id,
                item_type,
                stored_content,
                metadata_json,
                signature,
                pack(&embedding),
                embedding.len(),
                now,
                now,
            ],
        )?;
        Ok(true)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        item_type: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut query_embedding = self.embedder.embed(query).await?;
        normalize(&mut query_embedding);

        let rows: Vec<(String, String, String, Option<String>, Vec<u8>)> = {
            let conn = self.conn.lock();
            let sql = match item_type {
                Some(_) => {
                    "SELECT item_id, item_type, content, metadata_json, embedding
                     FROM embeddings WHERE item_type = ?1"
                }
                None => {
                    "SELECT item_id, item_type, content, metadata_json, embedding
                     FROM embeddings"
                }
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            };
            match item_type {
                Some(t) => stmt
                    .query_map(params![t], map_row)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
            }
        };

        let mut results: Vec<SearchResult> = rows
            .into_iter()
            .map(|(item_id, item_type, content, metadata_json, blob)| {
                let embedding = unpack(&blob);
                let score = dot(&query_embedding, &embedding);
                SearchResult {
                    item_id,
                    item_type,
                    score,
                    content_preview: content.chars().take(MAX_PREVIEW_LEN).collect(),
                    metadata: metadata_json
                        .and_then(|m| serde_json::from_str(&m).ok())
                        .unwrap_or(Value::Null),
                    source: self.tier,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn delete(&self, item_id: &str) -> Result<bool, SearchError> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM embeddings WHERE item_id = ?1", params![item_id])?;
        Ok(affected > 0)
    }

    async fn update(
        &self,
        item_id: &str,
        content: &str,
        metadata: &Value,
    ) -> Result<bool, SearchError> {
        let item_type: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT item_type FROM embeddings WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?
        };

        let Some(item_type) = item_type else {
            return Ok(false);
        };
        self.embed_and_store(item_id, &item_type, content, metadata, None)
            .await
    }

    async fn exists(&self, item_id: &str) -> Result<bool, SearchError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM embeddings WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("db_path", &self.db_path)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Little-endian f32 packing.
fn pack(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn unpack(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
