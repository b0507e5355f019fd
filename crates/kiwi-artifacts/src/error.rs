//! Error types for artifact parsing and validation.

use thiserror::Error;

/// Errors raised while parsing or validating artifact metadata.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Content could not be parsed at all (bad XML, bad YAML, bad literal).
    #[error("Parse error: {0}")]
    Parse(String),

    /// Content parsed but violates the required structure.
    #[error("Structure error: {0}")]
    Structure(String),

    /// A version string is not strict `X.Y.Z` semver.
    #[error("Invalid version '{0}': expected strict X.Y.Z")]
    InvalidVersion(String),

    /// Knowledge frontmatter is required for this operation but absent.
    #[error("Missing YAML frontmatter: signing requires a '---' delimited header")]
    MissingFrontmatter,

    /// Reading the source file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
