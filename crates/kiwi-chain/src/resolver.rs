//! Chain resolution by walking local files.
//!
//! Resolution needs no registry: each tool file names its executor, and
//! the walk follows `executor_id` until it reaches a primitive. Every link
//! must carry an embedded signature; the signature hash becomes the link's
//! `content_hash` for later verification.

use kiwi_artifacts::{parse_tool, ArtifactKind, Scope, ToolType};
use kiwi_integrity::FileDigest;
use kiwi_paths::{PathService, SearchScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// One link in a resolved executor chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub tool_id: String,
    pub version: String,
    pub tool_type: ToolType,
    /// `None` only on the terminal primitive link.
    pub executor_id: Option<String>,
    pub manifest: Value,
    /// File digests entering the integrity payload. Empty for single-file
    /// tools resolved locally; registry chains may carry a full list.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub files: Vec<FileDigest>,
    /// Integrity hash recorded in the link's signature.
    pub content_hash: String,
    /// Where the link resolved from, for diagnostics.
    pub file_path: PathBuf,
    pub source: Scope,
}

impl ChainLink {
    /// JSON view used by schema matching and chain validation.
    pub fn as_value(&self) -> Value {
        serde_json::json!({
            "tool_id": self.tool_id,
            "version": self.version,
            "tool_type": self.tool_type.as_str(),
            "executor_id": self.executor_id,
            "manifest": self.manifest,
        })
    }
}

/// Chain resolution failures.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The starting tool does not exist locally.
    #[error("Tool '{tool_id}' not found locally. Use 'load' to copy it from a higher tier first")]
    ToolNotFound { tool_id: String },

    /// A mid-chain executor is missing.
    #[error("Dependency '{missing}' not found locally for '{parent}'. Missing executor in chain: {chain_so_far:?} → {missing}")]
    MissingExecutor {
        parent: String,
        missing: String,
        chain_so_far: Vec<String>,
    },

    /// An id was reached twice.
    #[error("Circular dependency: '{repeated}' already visited (chain so far: {chain_so_far:?})")]
    CycleDetected {
        chain_so_far: Vec<String>,
        repeated: String,
    },

    /// A link carries no embedded signature.
    #[error("Tool '{tool_id}' has no signature. Sign it before resolving chains through it")]
    UnsignedLink { tool_id: String },

    /// A link's metadata failed to parse.
    #[error("Failed to extract metadata for '{tool_id}': {reason}")]
    LinkParse { tool_id: String, reason: String },

    /// The walk ended on a link that is not a primitive.
    #[error("Chain terminates at '{tool_id}' ({tool_type}), which is not a primitive")]
    TerminalNotPrimitive {
        tool_id: String,
        tool_type: ToolType,
    },

    /// Reading a link's file failed.
    #[error("IO error reading '{tool_id}': {source}")]
    Io {
        tool_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves executor chains leaf → primitive from local files.
pub struct ChainResolver {
    paths: Arc<PathService>,
}

impl ChainResolver {
    pub fn new(paths: Arc<PathService>) -> Self {
        Self { paths }
    }

    /// Walks the executor chain starting at `tool_id`.
    ///
    /// # Errors
    ///
    /// - [`ChainError::ToolNotFound`] when the starting id is absent.
    /// - [`ChainError::MissingExecutor`] when a later link is absent.
    /// - [`ChainError::CycleDetected`] when an id repeats; the error
    ///   carries the chain walked so far.
    /// - [`ChainError::UnsignedLink`] when a link has no signature.
    /// - [`ChainError::TerminalNotPrimitive`] when a link has no executor
    ///   but is not a primitive.
    pub fn resolve_chain(&self, tool_id: &str) -> Result<Vec<ChainLink>, ChainError> {
        let mut chain: Vec<ChainLink> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = tool_id.to_string();

        loop {
            if visited.contains(&current) {
                return Err(ChainError::CycleDetected {
                    chain_so_far: chain.iter().map(|l| l.tool_id.clone()).collect(),
                    repeated: current,
                });
            }
            visited.insert(current.clone());

            let resolution = self
                .paths
                .resolve(ArtifactKind::Tool, &current, SearchScope::Local);
            let Some(path) = resolution.path else {
                if chain.is_empty() {
                    return Err(ChainError::ToolNotFound {
                        tool_id: current,
                    });
                }
                return Err(ChainError::MissingExecutor {
                    parent: chain.last().map(|l| l.tool_id.clone()).unwrap_or_default(),
                    missing: current,
                    chain_so_far: chain.iter().map(|l| l.tool_id.clone()).collect(),
                });
            };

            let content = std::fs::read_to_string(&path).map_err(|source| ChainError::Io {
                tool_id: current.clone(),
                source,
            })?;

            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let parsed = parse_tool(&content, &extension).map_err(|e| ChainError::LinkParse {
                tool_id: current.clone(),
                reason: e.to_string(),
            })?;

            let signature =
                kiwi_integrity::extract_signature(&content).ok_or(ChainError::UnsignedLink {
                    tool_id: current.clone(),
                })?;
            debug!(tool_id = %current, hash = %kiwi_integrity::short_hash(&signature.hash), "link signature found");

            let metadata = parsed.metadata;
            let link = ChainLink {
                tool_id: current.clone(),
                version: metadata.version.clone(),
                tool_type: metadata.tool_type,
                executor_id: metadata.executor_id.clone(),
                manifest: metadata.manifest(),
                files: Vec::new(),
                content_hash: signature.hash,
                file_path: path,
                source: resolution.scope.unwrap_or(Scope::Project),
            };

            let next = link.executor_id.clone();
            let tool_type = link.tool_type;
            chain.push(link);

            match next {
                Some(executor) => current = executor,
                None => {
                    if tool_type != ToolType::Primitive {
                        return Err(ChainError::TerminalNotPrimitive {
                            tool_id: chain.last().unwrap().tool_id.clone(),
                            tool_type,
                        });
                    }
                    debug!(links = chain.len(), "chain complete");
                    return Ok(chain);
                }
            }
        }
    }
}
