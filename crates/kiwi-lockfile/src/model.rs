//! Lockfile wire format, freezing, and chain validation.

use chrono::{DateTime, Utc};
use kiwi_chain::ChainLink;
use kiwi_integrity::short_hash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only lockfile format this kernel reads or writes.
pub const LOCKFILE_VERSION: u32 = 1;

/// One pinned entry of the resolved chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub tool_id: String,
    pub version: String,
    pub integrity: String,
    /// Executor of this entry, `None` on the terminal primitive.
    pub executor: Option<String>,
}

/// The root tool the lockfile was frozen for. Always equals the first
/// entry of `resolved_chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPin {
    pub tool_id: String,
    pub version: String,
    pub integrity: String,
}

/// Provenance of a registry-resolved chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryProvenance {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// A complete lockfile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lockfile {
    pub lockfile_version: u32,
    pub generated_at: DateTime<Utc>,
    pub root: RootPin,
    pub resolved_chain: Vec<LockEntry>,
    pub registry: Option<RegistryProvenance>,
}

impl Lockfile {
    /// `tool_id → version` map of every pinned entry.
    pub fn pinned_versions(&self) -> std::collections::BTreeMap<String, String> {
        self.resolved_chain
            .iter()
            .map(|e| (e.tool_id.clone(), e.version.clone()))
            .collect()
    }
}

/// Result of validating a resolved chain against a lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainCheck {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Lockfile failures.
#[derive(Debug, Error)]
pub enum LockfileError {
    /// Freezing requires at least one resolved link.
    #[error("Cannot create lockfile from empty chain for '{0}'")]
    EmptyChain(String),

    /// Project scope requested with no project root configured.
    #[error("Cannot use project scope: no project root set")]
    ScopeUnavailable,

    /// The on-disk file declares an unsupported format version.
    #[error("Unsupported lockfile version: {found} (expected {LOCKFILE_VERSION})")]
    VersionMismatch { found: u32 },

    /// The on-disk file is not valid JSON for the schema.
    #[error("Corrupt lockfile at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Freezes a resolved and verified chain into a lockfile.
///
/// Entries preserve chain order; the root pin is the first link.
pub fn freeze(
    chain: &[ChainLink],
    registry_url: Option<&str>,
) -> Result<Lockfile, LockfileError> {
    let Some(first) = chain.first() else {
        return Err(LockfileError::EmptyChain("<unknown>".into()));
    };

    let now = Utc::now();
    let entries = chain
        .iter()
        .map(|link| LockEntry {
            tool_id: link.tool_id.clone(),
            version: link.version.clone(),
            integrity: link.content_hash.clone(),
            executor: link.executor_id.clone(),
        })
        .collect();

    Ok(Lockfile {
        lockfile_version: LOCKFILE_VERSION,
        generated_at: now,
        root: RootPin {
            tool_id: first.tool_id.clone(),
            version: first.version.clone(),
            integrity: first.content_hash.clone(),
        },
        resolved_chain: entries,
        registry: registry_url.map(|url| RegistryProvenance {
            url: url.to_string(),
            fetched_at: now,
        }),
    })
}

/// Validates a freshly resolved chain against a lockfile.
///
/// A length mismatch is fatal on its own. Per position, `tool_id`,
/// `version`, and `integrity` must agree; the integrity comparison is
/// skipped when either side is empty, which permits partial lockfiles.
/// Short hashes appear in messages, full hashes never leave the file.
pub fn validate_against_chain(lockfile: &Lockfile, chain: &[ChainLink]) -> ChainCheck {
    let mut issues = Vec::new();

    if chain.len() != lockfile.resolved_chain.len() {
        issues.push(format!(
            "Chain length mismatch: lockfile has {}, resolved has {}",
            lockfile.resolved_chain.len(),
            chain.len()
        ));
        return ChainCheck {
            valid: false,
            issues,
        };
    }

    for (i, (expected, actual)) in lockfile.resolved_chain.iter().zip(chain).enumerate() {
        if expected.tool_id != actual.tool_id {
            issues.push(format!(
                "Tool ID mismatch at position {i}: lockfile={}, resolved={}",
                expected.tool_id, actual.tool_id
            ));
        }
        if expected.version != actual.version {
            issues.push(format!(
                "Version mismatch for {}: lockfile={}, resolved={}",
                expected.tool_id, expected.version, actual.version
            ));
        }
        if !expected.integrity.is_empty() && !actual.content_hash.is_empty() {
            if expected.integrity != actual.content_hash {
                issues.push(format!(
                    "Integrity mismatch for {}@{}: lockfile={}, resolved={}",
                    expected.tool_id,
                    expected.version,
                    short_hash(&expected.integrity),
                    short_hash(&actual.content_hash)
                ));
            }
        }
    }

    ChainCheck {
        valid: issues.is_empty(),
        issues,
    }
}
