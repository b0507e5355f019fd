//! Knowledge entry parsing.
//!
//! Knowledge entries are markdown documents with mandatory YAML
//! frontmatter between `---` delimiters. The frontmatter map becomes the
//! metadata; everything after it is the body. Missing frontmatter is
//! tolerated only for read-only loads, never for signing.

use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of knowledge entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Pattern,
    Learning,
    Reference,
    Concept,
    Decision,
    Insight,
    Procedure,
    ApiFact,
    Experiment,
    Template,
    Workflow,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Pattern => "pattern",
            EntryType::Learning => "learning",
            EntryType::Reference => "reference",
            EntryType::Concept => "concept",
            EntryType::Decision => "decision",
            EntryType::Insight => "insight",
            EntryType::Procedure => "procedure",
            EntryType::ApiFact => "api_fact",
            EntryType::Experiment => "experiment",
            EntryType::Template => "template",
            EntryType::Workflow => "workflow",
        }
    }
}

/// A directed, labeled link to another zettel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Target zettel id.
    pub target: String,
    /// Label, e.g. `extends`, `contradicts`, `refines`.
    pub relationship_type: String,
}

/// A parsed knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Date-prefixed identifier, e.g. `20260124-api-patterns`.
    pub zettel_id: String,
    pub title: String,
    pub version: String,
    pub entry_type: Option<EntryType>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_type: Option<String>,
    pub source_url: Option<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub collections: Vec<String>,
}

/// Parser output: typed entry, raw frontmatter map, and body.
#[derive(Debug, Clone)]
pub struct ParsedKnowledge {
    pub entry: KnowledgeEntry,
    /// The full frontmatter map as JSON, for hashing and indexing.
    pub metadata: Value,
    /// Markdown body after the closing delimiter, signature stripped.
    pub body: String,
}

/// Parses a knowledge source file.
///
/// When `require_frontmatter` is false and no frontmatter exists, the
/// whole file becomes the body and the entry carries empty metadata; a
/// signing path must pass `true` and will receive
/// [`ArtifactError::MissingFrontmatter`] instead.
pub fn parse_knowledge(
    content: &str,
    require_frontmatter: bool,
) -> Result<ParsedKnowledge, ArtifactError> {
    let stripped = kiwi_integrity::strip_signature(content);

    let Some((front, body)) = split_frontmatter(&stripped) else {
        if require_frontmatter {
            return Err(ArtifactError::MissingFrontmatter);
        }
        return Ok(ParsedKnowledge {
            entry: KnowledgeEntry {
                zettel_id: String::new(),
                title: String::new(),
                version: String::new(),
                entry_type: None,
                tags: Vec::new(),
                source_type: None,
                source_url: None,
                relationships: Vec::new(),
                collections: Vec::new(),
            },
            metadata: Value::Object(Default::default()),
            body: stripped,
        });
    };

    let yaml: serde_yaml::Value = serde_yaml::from_str(front)
        .map_err(|e| ArtifactError::Parse(format!("invalid YAML frontmatter: {e}")))?;
    let metadata: Value = serde_json::to_value(&yaml)
        .map_err(|e| ArtifactError::Parse(format!("frontmatter not JSON-representable: {e}")))?;

    if !metadata.is_object() {
        return Err(ArtifactError::Structure(
            "frontmatter must be a YAML mapping".into(),
        ));
    }

    let entry: KnowledgeEntry = serde_json::from_value(normalize_entry(&metadata))
        .map_err(|e| ArtifactError::Structure(format!("invalid frontmatter fields: {e}")))?;

    Ok(ParsedKnowledge {
        entry,
        metadata,
        body: body.to_string(),
    })
}

/// Splits `--- frontmatter --- body`. The opening delimiter must be the
/// first non-empty line.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_start_matches(['\n', '\r']);
    let rest = trimmed.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;

    let close = rest.find("\n---")?;
    let front = &rest[..close];
    let after = &rest[close + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Some((front, body))
}

/// Maps loose frontmatter onto the typed entry: fills defaults for absent
/// fields and drops unknown keys (they stay available in `metadata`).
fn normalize_entry(metadata: &Value) -> Value {
    let map = metadata.as_object().cloned().unwrap_or_default();
    let get_str =
        |key: &str| -> Value { map.get(key).cloned().unwrap_or(Value::String(String::new())) };

    serde_json::json!({
        "zettel_id": get_str("zettel_id"),
        "title": get_str("title"),
        "version": get_str("version"),
        "entry_type": map.get("entry_type").cloned().unwrap_or(Value::Null),
        "tags": map.get("tags").cloned().unwrap_or(Value::Array(vec![])),
        "source_type": map.get("source_type").cloned().unwrap_or(Value::Null),
        "source_url": map.get("source_url").cloned().unwrap_or(Value::Null),
        "relationships": map.get("relationships").cloned().unwrap_or(Value::Array(vec![])),
        "collections": map.get("collections").cloned().unwrap_or(Value::Array(vec![])),
    })
}
