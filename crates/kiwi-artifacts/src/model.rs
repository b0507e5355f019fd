//! Shared artifact model: kinds, scopes, and version rules.

use crate::error::ArtifactError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder version assigned when a tool declares none. The signer
/// rejects it, so unversioned tools cannot enter a verified chain.
pub const UNSIGNED_VERSION: &str = "0.0.0";

static STRICT_SEMVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid regex"));

/// The three artifact kinds managed by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Directive,
    Tool,
    Knowledge,
}

impl ArtifactKind {
    /// Stable lowercase identifier used in indexes and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Directive => "directive",
            ArtifactKind::Tool => "tool",
            ArtifactKind::Knowledge => "knowledge",
        }
    }

    /// Directory name under a scope root (`.ai/<dir>/...`).
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Directive => "directives",
            ArtifactKind::Tool => "tools",
            ArtifactKind::Knowledge => "knowledge",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directive" => Ok(ArtifactKind::Directive),
            "tool" => Ok(ArtifactKind::Tool),
            "knowledge" => Ok(ArtifactKind::Knowledge),
            other => Err(ArtifactError::Parse(format!(
                "unknown artifact kind '{other}'"
            ))),
        }
    }
}

/// Storage tier an artifact was resolved from.
///
/// Search and load traverse project before user; a project artifact always
/// shadows a user artifact with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Project,
    User,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::User => "user",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag of a directive `<permission>` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTag {
    Read,
    Write,
    Execute,
}

/// Parses a version string under the strict `X.Y.Z` rule.
///
/// No coercion is performed: prerelease tags, build metadata, missing
/// components, and leading `v` are all rejected.
///
/// # Example
///
/// ```rust
/// use kiwi_artifacts::parse_strict_version;
///
/// assert!(parse_strict_version("1.4.0").is_ok());
/// assert!(parse_strict_version("1.4").is_err());
/// assert!(parse_strict_version("v1.4.0").is_err());
/// assert!(parse_strict_version("1.4.0-beta").is_err());
/// ```
pub fn parse_strict_version(version: &str) -> Result<semver::Version, ArtifactError> {
    if !STRICT_SEMVER.is_match(version) {
        return Err(ArtifactError::InvalidVersion(version.to_string()));
    }
    semver::Version::parse(version)
        .map_err(|_| ArtifactError::InvalidVersion(version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ArtifactKind::Directive,
            ArtifactKind::Tool,
            ArtifactKind::Knowledge,
        ] {
            assert_eq!(ArtifactKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_dir_names() {
        assert_eq!(ArtifactKind::Directive.dir_name(), "directives");
        assert_eq!(ArtifactKind::Tool.dir_name(), "tools");
        assert_eq!(ArtifactKind::Knowledge.dir_name(), "knowledge");
    }

    #[test]
    fn test_strict_version_accepts_plain_semver() {
        let v = parse_strict_version("2.10.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 10, 3));
    }

    #[test]
    fn test_strict_version_rejects_coercible_forms() {
        for bad in ["1", "1.0", "v1.0.0", "1.0.0-rc.1", "1.0.0+build", " 1.0.0"] {
            assert!(parse_strict_version(bad).is_err(), "accepted {bad:?}");
        }
    }
}
