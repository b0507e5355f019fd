//! # Canonical Integrity
//!
//! Content-addressed hashing and signature blocks for the three artifact
//! kinds managed by the kiwi kernel: directives, tools, and knowledge
//! entries.
//!
//! ## Threat Model
//!
//! Integrity hashing defends against:
//!
//! - **Re-encoding drift**: the same artifact serialized with different key
//!   order or whitespace must produce the same hash.
//! - **Silent tampering**: any execution-relevant byte change in content or
//!   metadata changes the hash, which invalidates the embedded signature.
//! - **Signature confusion**: re-signing removes the previous signature
//!   line first, so signing is idempotent and hashes converge.
//!
//! ## Hash Construction
//!
//! Every kind follows the same recipe:
//!
//! 1. Build a canonical payload with sorted keys.
//! 2. Serialize to JSON with no insignificant whitespace.
//! 3. Return the SHA-256 hex digest (64 characters).
//!
//! | Kind | Payload |
//! |------|---------|
//! | Tool | `{tool_id, version, manifest, files: [{path, sha256}]}` |
//! | Directive | `{directive_name, version, xml_hash, metadata}` |
//! | Knowledge | `{zettel_id, version, content_hash, metadata}` |

mod canonical;
mod error;
mod hash;
mod signature;

pub use canonical::{canonical_json, hash_canonical, sha256_hex};
pub use error::IntegrityError;
pub use hash::{
    compute_directive_integrity, compute_knowledge_integrity, compute_tool_integrity, short_hash,
    FileDigest, KNOWLEDGE_VALIDATION_KEYS,
};
pub use signature::{
    embed_signature, extract_signature, strip_signature, CommentStyle, SignatureBlock,
};

/// Result type for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;
