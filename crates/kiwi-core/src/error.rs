//! Error aggregation for the kernel facade.

use thiserror::Error;

/// Top-level error type for kernel operations.
///
/// Component errors pass through; the facade adds only the cross-cutting
/// kinds (verification, chain validation, lockfile mismatch) that arise
/// from composing components.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Artifact parsing or metadata validation failed.
    #[error("Artifact error: {0}")]
    Artifact(#[from] kiwi_artifacts::ArtifactError),

    /// Integrity payload construction failed.
    #[error("Integrity error: {0}")]
    Integrity(#[from] kiwi_integrity::IntegrityError),

    /// Chain resolution failed (not found, missing executor, cycle,
    /// unsigned link).
    #[error("Chain error: {0}")]
    Chain(#[from] kiwi_chain::ChainError),

    /// A link's stored hash did not match its recomputed hash.
    #[error("Integrity verification failed: {0}")]
    Verification(String),

    /// Parent/child chain constraints failed.
    #[error("Chain validation failed: {issues:?}")]
    ChainValidation { issues: Vec<String> },

    /// Lockfile load/save failure.
    #[error("Lockfile error: {0}")]
    Lockfile(#[from] kiwi_lockfile::LockfileError),

    /// The resolved chain disagrees with the stored lockfile (strict
    /// mode only; warn mode reports the issues and proceeds).
    #[error("Lockfile mismatch: {issues:?}")]
    LockfileMismatch { issues: Vec<String> },

    /// Runtime (token/keychain) failure.
    #[error("Runtime error: {0}")]
    Runtime(#[from] kiwi_runtime::RuntimeError),

    /// Registry operation failure.
    #[error("Registry error: {0}")]
    Registry(#[from] kiwi_registry::RegistryError),

    /// Search layer failure.
    #[error("Search error: {0}")]
    Search(#[from] kiwi_search::SearchError),

    /// An artifact the operation needs does not exist locally.
    #[error("Not found: {0}. Use 'load' to copy it from a higher tier first")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
