//! Per-kind integrity hash construction.
//!
//! The integrity hash is the content-addressed identity of an artifact
//! version. It changes when any execution-relevant byte changes in the
//! content or metadata, and only then.

use crate::canonical::{hash_canonical, sha256_hex};
use crate::error::IntegrityError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Metadata keys excluded from knowledge hashing so that re-signing
/// converges instead of chasing its own output.
pub const KNOWLEDGE_VALIDATION_KEYS: &[&str] = &["validated_at", "content_hash", "integrity"];

/// A file participating in a tool's integrity payload.
///
/// Only the relative path and content digest enter the hash; the file
/// bytes themselves are hashed once, upstream, into `sha256`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Path relative to the tool root.
    pub path: String,
    /// SHA-256 hex digest of the file content.
    pub sha256: String,
}

/// Computes the integrity hash for a tool version.
///
/// The payload is `{tool_id, version, manifest, files}` with `files`
/// sorted by path, rendered canonically and hashed with SHA-256.
///
/// # Example
///
/// ```rust
/// use kiwi_integrity::{compute_tool_integrity, FileDigest};
/// use serde_json::json;
///
/// let files = vec![FileDigest {
///     path: "main.py".into(),
///     sha256: "ab".repeat(32),
/// }];
/// let h1 = compute_tool_integrity("hello", "1.0.0", &json!({"entrypoint": "main.py"}), &files).unwrap();
/// let h2 = compute_tool_integrity("hello", "1.0.0", &json!({"entrypoint": "main.py"}), &files).unwrap();
/// assert_eq!(h1, h2);
/// assert_eq!(h1.len(), 64);
/// ```
pub fn compute_tool_integrity(
    tool_id: &str,
    version: &str,
    manifest: &Value,
    files: &[FileDigest],
) -> Result<String, IntegrityError> {
    let mut sorted: Vec<&FileDigest> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let file_entries: Vec<Value> = sorted
        .iter()
        .map(|f| json!({"path": f.path, "sha256": f.sha256}))
        .collect();

    let payload = json!({
        "tool_id": tool_id,
        "version": version,
        "manifest": manifest,
        "files": file_entries,
    });

    hash_canonical(&payload)
}

/// Computes the integrity hash for a directive version.
///
/// The XML body is hashed on its own first; the payload then carries
/// `xml_hash` rather than the body bytes. `metadata` is restricted by the
/// caller to `{category, description, model_tier}`.
pub fn compute_directive_integrity(
    directive_name: &str,
    version: &str,
    xml_content: &str,
    metadata: &Value,
) -> Result<String, IntegrityError> {
    let xml_hash = sha256_hex(xml_content.as_bytes());

    let payload = json!({
        "directive_name": directive_name,
        "version": version,
        "xml_hash": xml_hash,
        "metadata": metadata,
    });

    hash_canonical(&payload)
}

/// Computes the integrity hash for a knowledge entry version.
///
/// `content` is the markdown body after frontmatter and any existing
/// signature have been removed. Validation bookkeeping keys are stripped
/// from `metadata` before hashing (see [`KNOWLEDGE_VALIDATION_KEYS`]).
pub fn compute_knowledge_integrity(
    zettel_id: &str,
    version: &str,
    content: &str,
    metadata: &Value,
) -> Result<String, IntegrityError> {
    let content_hash = sha256_hex(content.as_bytes());

    let cleaned = match metadata {
        Value::Object(map) => {
            let filtered: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !KNOWLEDGE_VALIDATION_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    };

    let payload = json!({
        "zettel_id": zettel_id,
        "version": version,
        "content_hash": content_hash,
        "metadata": cleaned,
    });

    hash_canonical(&payload)
}

/// Returns the display form of a hash: its first 12 hex characters.
pub fn short_hash(full_hash: &str) -> &str {
    let end = full_hash.len().min(12);
    &full_hash[..end]
}
