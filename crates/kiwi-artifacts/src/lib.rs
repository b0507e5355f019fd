//! # Artifact Model & Metadata Parsers
//!
//! Typed representations of the three artifact kinds managed by the kiwi
//! kernel, the parsers that extract them from source bytes, and the
//! JSON-Schema validator applied to parsed metadata.
//!
//! ## Threat Model
//!
//! The types here defend against:
//!
//! - **Type confusion**: `ToolType` is a closed variant set; `primitive`
//!   is the only type where a missing executor is legal, and that rule
//!   lives in the type layer rather than in scattered string checks.
//! - **Structure smuggling**: the directive parser enforces element order
//!   and rejects unknown elements, so an artifact cannot hide payload in
//!   sections the kernel does not inspect.
//! - **Version coercion**: versions parse as strict `X.Y.Z` semver with no
//!   normalization; `"1.0"` and `"v1.0.0"` are rejected, not repaired.
//!
//! ## Parsers
//!
//! | Kind | Source | Parser |
//! |------|--------|--------|
//! | Directive | markdown with one `xml` fenced block | [`directive`] |
//! | Tool | script head (`TOOL_METADATA` map or assignments) | [`tool`] |
//! | Knowledge | YAML frontmatter + markdown body | [`knowledge`] |
//!
//! Each parser returns the normalized structure plus the exact raw content
//! used for hashing, with any embedded signature already stripped.

pub mod directive;
pub mod knowledge;
mod model;
pub mod schema;
pub mod tool;

mod error;

pub use directive::{
    parse_directive, Directive, InputSpec, InputType, ParsedDirective, PermissionDecl, Step,
};
pub use error::ArtifactError;
pub use knowledge::{parse_knowledge, EntryType, KnowledgeEntry, ParsedKnowledge, Relationship};
pub use model::{parse_strict_version, ArtifactKind, PermissionTag, Scope, UNSIGNED_VERSION};
pub use schema::{SchemaValidator, ValidationOutcome};
pub use tool::{parse_tool, ParsedTool, ToolMetadata, ToolType};

/// Result type for artifact parsing and validation.
pub type Result<T> = std::result::Result<T, ArtifactError>;
