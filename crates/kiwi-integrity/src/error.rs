//! Error types for integrity operations.

use thiserror::Error;

/// Errors raised while producing canonical payloads or signature lines.
///
/// Parse and IO failures never surface through this type; callers see
/// those as their own error kinds before integrity computation begins.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The payload contains a value with no canonical JSON form
    /// (for example a non-finite float).
    #[error("Cannot canonicalize payload: {0}")]
    Canonical(String),

    /// The artifact version is missing or is the unsigned placeholder.
    #[error("Refusing to sign version '{0}': set an explicit semver version first")]
    UnsignedVersion(String),
}
