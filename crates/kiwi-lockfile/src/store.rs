//! Hierarchical lockfile storage with project/user precedence.

use crate::model::{
    freeze as freeze_chain, ChainCheck, Lockfile, LockfileError, LOCKFILE_VERSION,
};
use chrono::{DateTime, Duration, Utc};
use kiwi_artifacts::Scope;
use kiwi_chain::ChainLink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const INDEX_FILE: &str = ".index.json";

/// Listing metadata for one stored lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileMetadata {
    pub tool_id: String,
    pub version: String,
    pub category: String,
    pub chain_hash: String,
    pub path: PathBuf,
    pub scope: Scope,
    pub created_at: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
}

/// On-disk index schema (`.index.json` per scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default = "index_version")]
    version: String,
    #[serde(default)]
    lockfiles: BTreeMap<String, IndexEntry>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn index_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    /// Path relative to the scope's lockfiles directory.
    path: String,
    chain_hash: String,
    created_at: DateTime<Utc>,
    last_validated: Option<DateTime<Utc>>,
    scope: Scope,
}

/// Lockfile store spanning the project and user tiers.
///
/// Load precedence is strictly project over user: a user lockfile never
/// overrides a present project one. Saves are atomic (temp + rename) and
/// keep the per-scope `.index.json` current.
pub struct LockfileStore {
    project_dir: Option<PathBuf>,
    user_dir: PathBuf,
    index_cache: Mutex<HashMap<Scope, Index>>,
}

impl LockfileStore {
    /// `project_root` is the directory holding `.ai/`; `user_space` is the
    /// user tier root (typically `~/.ai`).
    pub fn new(project_root: Option<PathBuf>, user_space: PathBuf) -> Self {
        Self {
            project_dir: project_root.map(|root| root.join(".ai").join("lockfiles")),
            user_dir: user_space.join("lockfiles"),
            index_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a lockfile from a resolved chain. Warns (but proceeds) when
    /// the chain root does not match the requested tool, matching the
    /// freeze contract: the chain is the source of truth.
    pub fn freeze(
        &self,
        tool_id: &str,
        version: &str,
        chain: &[ChainLink],
        registry_url: Option<&str>,
    ) -> Result<Lockfile, LockfileError> {
        if chain.is_empty() {
            return Err(LockfileError::EmptyChain(tool_id.to_string()));
        }
        if chain[0].tool_id != tool_id {
            warn!(
                expected = tool_id,
                actual = %chain[0].tool_id,
                "freeze root mismatch"
            );
        }
        let lockfile = freeze_chain(chain, registry_url)?;
        info!(tool_id, version, links = chain.len(), "froze lockfile");
        Ok(lockfile)
    }

    /// Saves a lockfile under `{scope}/lockfiles/{category}/` and updates
    /// the scope index.
    ///
    /// The filename is `{id}@{version}.lock.json`, or
    /// `{id}@{version}.{chain12}.lock.json` when `chain_hash` is given,
    /// allowing several distinct chains per version to coexist.
    pub fn save(
        &self,
        lockfile: &Lockfile,
        category: &str,
        scope: Scope,
        chain_hash: Option<&str>,
    ) -> Result<PathBuf, LockfileError> {
        let base = self.scope_dir(scope)?;
        let category_dir = if category.is_empty() {
            base.clone()
        } else {
            base.join(category)
        };
        std::fs::create_dir_all(&category_dir)?;

        let filename = match chain_hash {
            Some(hash) => format!(
                "{}@{}.{}.lock.json",
                lockfile.root.tool_id,
                lockfile.root.version,
                &hash[..hash.len().min(12)]
            ),
            None => format!(
                "{}@{}.lock.json",
                lockfile.root.tool_id, lockfile.root.version
            ),
        };
        let path = category_dir.join(&filename);

        write_atomic(&path, &serde_json::to_vec_pretty(lockfile).map_err(|e| {
            LockfileError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?)?;

        self.update_index(lockfile, category, scope, &base, &path)?;
        info!(path = %path.display(), "saved lockfile");
        Ok(path)
    }

    /// Loads a lockfile with project-over-user precedence. A hit touches
    /// the index's `last_validated` timestamp.
    ///
    /// # Errors
    ///
    /// [`LockfileError::VersionMismatch`] for an unsupported
    /// `lockfile_version`, [`LockfileError::Corrupt`] when the file is not
    /// valid JSON for the schema. A missing file is `Ok(None)`.
    pub fn load(
        &self,
        tool_id: &str,
        version: &str,
        category: &str,
    ) -> Result<Option<Lockfile>, LockfileError> {
        for scope in [Scope::Project, Scope::User] {
            let Ok(base) = self.scope_dir(scope) else {
                continue;
            };
            let category_dir = if category.is_empty() {
                base.clone()
            } else {
                base.join(category)
            };
            let path = category_dir.join(format!("{tool_id}@{version}.lock.json"));
            if !path.is_file() {
                continue;
            }

            let lockfile = load_file(&path)?;
            self.touch(tool_id, version, category, scope);
            debug!(tool_id, version, scope = %scope, "loaded lockfile");
            return Ok(Some(lockfile));
        }
        debug!(tool_id, version, "no lockfile found");
        Ok(None)
    }

    /// Validates a resolved chain against a lockfile. Delegates to
    /// [`crate::validate_against_chain`]; kept on the store so callers
    /// hold one handle for the whole lockfile lifecycle.
    pub fn validate_chain(&self, lockfile: &Lockfile, chain: &[ChainLink]) -> ChainCheck {
        crate::model::validate_against_chain(lockfile, chain)
    }

    /// Lists stored lockfiles, optionally filtered by category and scope,
    /// sorted by tool id then version.
    pub fn list(
        &self,
        category: Option<&str>,
        scope: Option<Scope>,
    ) -> Vec<LockfileMetadata> {
        let mut results = Vec::new();
        for tier in [Scope::Project, Scope::User] {
            if scope.is_some() && scope != Some(tier) {
                continue;
            }
            let Ok(base) = self.scope_dir(tier) else {
                continue;
            };
            if !base.is_dir() {
                continue;
            }

            let index = self.load_index(tier);
            for (key, entry) in &index.lockfiles {
                let Some((cat, id_version)) = key.rsplit_once('/') else {
                    continue;
                };
                if let Some(filter) = category {
                    if cat != filter {
                        continue;
                    }
                }
                let Some((tool_id, version)) = id_version.split_once('@') else {
                    continue;
                };
                results.push(LockfileMetadata {
                    tool_id: tool_id.to_string(),
                    version: version.to_string(),
                    category: cat.to_string(),
                    chain_hash: entry.chain_hash.clone(),
                    path: base.join(&entry.path),
                    scope: tier,
                    created_at: Some(entry.created_at),
                    last_validated: entry.last_validated,
                });
            }
        }
        results.sort_by(|a, b| {
            (a.tool_id.as_str(), a.version.as_str()).cmp(&(b.tool_id.as_str(), b.version.as_str()))
        });
        results
    }

    /// Deletes lockfiles whose `last_validated` (or `created_at` when
    /// never validated) is older than `max_age_days`. Returns the count
    /// removed.
    pub fn prune_stale(&self, max_age_days: i64, scope: Option<Scope>) -> usize {
        let now = Utc::now();
        let mut pruned = 0usize;

        for tier in [Scope::Project, Scope::User] {
            if scope.is_some() && scope != Some(tier) {
                continue;
            }
            let Ok(base) = self.scope_dir(tier) else {
                continue;
            };
            if !base.is_dir() {
                continue;
            }

            let mut index = self.load_index(tier);
            let stale: Vec<String> = index
                .lockfiles
                .iter()
                .filter(|(_, entry)| {
                    let reference = entry.last_validated.unwrap_or(entry.created_at);
                    now - reference > Duration::days(max_age_days)
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in stale {
                if let Some(entry) = index.lockfiles.remove(&key) {
                    let path = base.join(&entry.path);
                    if path.is_file() {
                        if let Err(e) = std::fs::remove_file(&path) {
                            warn!(path = %path.display(), error = %e, "failed to delete stale lockfile");
                        } else {
                            debug!(path = %path.display(), "deleted stale lockfile");
                        }
                    }
                    pruned += 1;
                }
            }
            let _ = self.save_index(tier, &base, index);
        }

        info!(pruned, max_age_days, "pruned stale lockfiles");
        pruned
    }

    /// First 12 hex characters of the SHA-256 over
    /// `tool_id@version:integrity|…` across the resolved chain.
    pub fn chain_hash(lockfile: &Lockfile) -> String {
        let joined: Vec<String> = lockfile
            .resolved_chain
            .iter()
            .map(|e| format!("{}@{}:{}", e.tool_id, e.version, e.integrity))
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(joined.join("|").as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..12].to_string()
    }

    fn scope_dir(&self, scope: Scope) -> Result<PathBuf, LockfileError> {
        match scope {
            Scope::Project => self
                .project_dir
                .clone()
                .ok_or(LockfileError::ScopeUnavailable),
            Scope::User => Ok(self.user_dir.clone()),
        }
    }

    fn update_index(
        &self,
        lockfile: &Lockfile,
        category: &str,
        scope: Scope,
        base: &Path,
        path: &Path,
    ) -> Result<(), LockfileError> {
        let mut index = self.load_index(scope);

        let key = format!(
            "{}/{}@{}",
            category, lockfile.root.tool_id, lockfile.root.version
        );
        let rel_path = path
            .strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        index.lockfiles.insert(
            key,
            IndexEntry {
                path: rel_path,
                chain_hash: Self::chain_hash(lockfile),
                created_at: lockfile.generated_at,
                last_validated: Some(lockfile.generated_at),
                scope,
            },
        );
        index.updated_at = Some(Utc::now());

        self.save_index(scope, base, index)
    }

    fn touch(&self, tool_id: &str, version: &str, category: &str, scope: Scope) {
        let Ok(base) = self.scope_dir(scope) else {
            return;
        };
        let mut index = self.load_index(scope);
        let key = format!("{category}/{tool_id}@{version}");
        if let Some(entry) = index.lockfiles.get_mut(&key) {
            entry.last_validated = Some(Utc::now());
            let _ = self.save_index(scope, &base, index);
        }
    }

    fn load_index(&self, scope: Scope) -> Index {
        if let Some(cached) = self.index_cache.lock().get(&scope) {
            return cached.clone();
        }

        let Ok(base) = self.scope_dir(scope) else {
            return Index::default();
        };
        let path = base.join(INDEX_FILE);
        let index = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "unreadable index, starting fresh");
                Index::default()
            }),
            Err(_) => Index::default(),
        };

        self.index_cache.lock().insert(scope, index.clone());
        index
    }

    fn save_index(&self, scope: Scope, base: &Path, index: Index) -> Result<(), LockfileError> {
        std::fs::create_dir_all(base)?;
        let path = base.join(INDEX_FILE);
        let bytes = serde_json::to_vec_pretty(&index).map_err(|e| LockfileError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &bytes)?;
        self.index_cache.lock().insert(scope, index);
        Ok(())
    }
}

impl std::fmt::Debug for LockfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockfileStore")
            .field("project_dir", &self.project_dir)
            .field("user_dir", &self.user_dir)
            .finish()
    }
}

/// Reads and schema-checks a single lockfile.
fn load_file(path: &Path) -> Result<Lockfile, LockfileError> {
    let bytes = std::fs::read(path)?;

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| LockfileError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    // Version gate before schema decoding: an unknown version is its own
    // error, not a generic decode failure.
    let found = value
        .get("lockfile_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    if found != LOCKFILE_VERSION {
        return Err(LockfileError::VersionMismatch { found });
    }

    serde_json::from_value(value).map_err(|e| LockfileError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Temp file + rename in the destination directory, so readers never see
/// a torn lockfile.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LockfileError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| LockfileError::Io(e.error))?;
    Ok(())
}
