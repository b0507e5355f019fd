//! Tool metadata parsing.
//!
//! Tools are scripts whose head declares either a `TOOL_METADATA` map or
//! top-level named assignments (`name`, `version`, `description`,
//! `tool_type`, `executor`). The module docstring supplies the description
//! when no explicit one is given. `tool_type` defaults from the file
//! extension, and `version` defaults to the unsigned placeholder which the
//! signer later rejects.

use crate::error::ArtifactError;
use crate::model::UNSIGNED_VERSION;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^(name|version|description|tool_type|executor_id|category|entrypoint)\s*=\s*"([^"]*)"\s*$"#)
        .expect("valid regex")
});

static DOCSTRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\A(?:#![^\n]*\n)?\s*"{3}(.*?)"{3}"#).expect("valid regex"));

static METADATA_MAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^TOOL_METADATA\s*=\s*\{").expect("valid regex"));

static EXECUTOR_MAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^executor\s*=\s*\{").expect("valid regex"));

/// Closed set of tool execution types.
///
/// `Primitive` is the only variant for which a missing `executor_id` is
/// legal: primitives terminate executor chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Script,
    Runtime,
    Primitive,
    Api,
    Bash,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Script => "script",
            ToolType::Runtime => "runtime",
            ToolType::Primitive => "primitive",
            ToolType::Api => "api",
            ToolType::Bash => "bash",
        }
    }

    /// Default type derived from a file extension.
    pub fn for_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.') {
            "sh" | "bash" => ToolType::Bash,
            _ => ToolType::Script,
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolType {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script" => Ok(ToolType::Script),
            "runtime" => Ok(ToolType::Runtime),
            "primitive" => Ok(ToolType::Primitive),
            "api" => Ok(ToolType::Api),
            "bash" => Ok(ToolType::Bash),
            other => Err(ArtifactError::Parse(format!("unknown tool type '{other}'"))),
        }
    }
}

/// Normalized tool metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tool_type: ToolType,
    /// The tool this one delegates execution to. `None` only for
    /// primitives.
    pub executor_id: Option<String>,
    pub category: String,
    pub entrypoint: Option<String>,
    /// Executor-specific configuration block.
    pub config: Value,
    pub env_config: Option<Value>,
    pub mutates_state: bool,
    /// `validation.child_schemas` list consulted by the chain validator.
    pub validation: Option<Value>,
}

impl ToolMetadata {
    /// Manifest map entering the integrity payload and chain links.
    /// `validation` rides along so chain validation sees the declared
    /// child schemas on locally resolved links.
    pub fn manifest(&self) -> Value {
        json!({
            "name": self.name,
            "version": self.version,
            "description": self.description,
            "tool_type": self.tool_type.as_str(),
            "executor_id": self.executor_id,
            "category": self.category,
            "config": self.config,
            "config_schema": Value::Null,
            "mutates_state": self.mutates_state,
            "validation": self.validation,
        })
    }
}

/// Parser output: normalized metadata plus the raw, signature-free source.
#[derive(Debug, Clone)]
pub struct ParsedTool {
    pub metadata: ToolMetadata,
    /// File content with any signature line stripped, used for hashing.
    pub raw: String,
}

/// Parses tool metadata from script source.
///
/// `extension` selects the fallback `tool_type` (for example `.sh` →
/// `bash`). Recognition order: a `TOOL_METADATA` map wins over top-level
/// assignments; the module docstring backfills a missing description.
pub fn parse_tool(content: &str, extension: &str) -> Result<ParsedTool, ArtifactError> {
    let raw = kiwi_integrity::strip_signature(content);

    let mut fields: Map<String, Value> = Map::new();

    if let Some(map) = extract_literal_map(&raw, &METADATA_MAP)? {
        fields = map;
    } else {
        for caps in ASSIGNMENT.captures_iter(&raw) {
            fields.insert(caps[1].to_string(), Value::String(caps[2].to_string()));
        }
        if let Some(exec) = extract_literal_map(&raw, &EXECUTOR_MAP)? {
            fields.insert("executor".to_string(), Value::Object(exec));
        }
    }

    let str_field = |key: &str| -> Option<String> {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let description = str_field("description").or_else(|| module_docstring(&raw));

    let tool_type = match str_field("tool_type") {
        Some(ref t) => t.parse()?,
        None => ToolType::for_extension(extension),
    };

    // Executor may be declared flat (`executor_id = "..."`) or as an
    // object carrying `type` plus executor-specific fields.
    let executor_obj = fields.get("executor").and_then(Value::as_object).cloned();
    let executor_id = str_field("executor_id").or_else(|| {
        executor_obj
            .as_ref()
            .and_then(|o| o.get("id").or_else(|| o.get("type")))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let config = fields
        .get("config")
        .cloned()
        .or_else(|| executor_obj.clone().map(Value::Object))
        .unwrap_or_else(|| json!({}));

    let metadata = ToolMetadata {
        name: str_field("name").unwrap_or_default(),
        version: str_field("version").unwrap_or_else(|| UNSIGNED_VERSION.to_string()),
        description: description.unwrap_or_default(),
        tool_type,
        executor_id,
        category: str_field("category").unwrap_or_default(),
        entrypoint: str_field("entrypoint"),
        config,
        env_config: fields.get("env_config").cloned(),
        mutates_state: fields
            .get("mutates_state")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        validation: fields.get("validation").cloned(),
    };

    Ok(ParsedTool { metadata, raw })
}

/// Extracts a brace-balanced literal map opened by `opener` and parses it
/// as JSON after normalizing Python-style literals (`True`, `False`,
/// `None`, single-quoted strings).
fn extract_literal_map(
    content: &str,
    opener: &Regex,
) -> Result<Option<Map<String, Value>>, ArtifactError> {
    let Some(m) = opener.find(content) else {
        return Ok(None);
    };

    // The match ends just past the opening brace.
    let start = m.end() - 1;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;
    let mut end = None;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => in_string = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| {
        ArtifactError::Parse("unterminated metadata map: unbalanced braces".into())
    })?;

    let literal = normalize_python_literals(&content[start..end]);
    let value: Value = serde_json::from_str(&literal)
        .map_err(|e| ArtifactError::Parse(format!("invalid metadata map: {e}")))?;

    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(ArtifactError::Parse("metadata map must be an object".into())),
    }
}

/// Rewrites the Python literals a metadata map may contain into JSON.
/// String-aware: quotes inside double-quoted strings pass through.
fn normalize_python_literals(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars().peekable();
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_double || in_single => {
                out.push(ch);
                escaped = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(ch);
            }
            '\'' if !in_double => {
                // Single-quoted Python strings become double-quoted JSON.
                in_single = !in_single;
                out.push('"');
            }
            ',' if !in_double && !in_single => {
                // Python tolerates trailing commas; JSON does not.
                let mut look = chars.clone();
                let next = loop {
                    match look.next() {
                        Some(c) if c.is_whitespace() => continue,
                        other => break other,
                    }
                };
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            _ if in_double || in_single => out.push(ch),
            'T' if remainder_starts(&mut chars, "rue") => out.push_str("true"),
            'F' if remainder_starts(&mut chars, "alse") => out.push_str("false"),
            'N' if remainder_starts(&mut chars, "one") => out.push_str("null"),
            _ => out.push(ch),
        }
    }
    out
}

fn remainder_starts(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, rest: &str) -> bool {
    let lookahead: String = chars.clone().take(rest.len()).collect();
    if lookahead == rest {
        for _ in 0..rest.len() {
            chars.next();
        }
        true
    } else {
        false
    }
}

fn module_docstring(content: &str) -> Option<String> {
    DOCSTRING
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSIGNMENT_STYLE: &str = r#""""Say hello through the node runtime."""

name = "hello_node"
version = "1.0.0"
tool_type = "script"
executor_id = "node_runtime"
entrypoint = "hello.js"
"#;

    const MAP_STYLE: &str = r#"TOOL_METADATA = {
    'name': 'node_runtime',
    'version': '1.4.0',
    'description': 'Node.js runtime wrapper',
    'tool_type': 'runtime',
    'executor_id': 'subprocess',
    'mutates_state': False,
    'config': {'interpreter': 'node', 'timeout': 60},
}
"#;

    #[test]
    fn test_parse_assignment_style() {
        let parsed = parse_tool(ASSIGNMENT_STYLE, ".py").unwrap();
        let m = &parsed.metadata;
        assert_eq!(m.name, "hello_node");
        assert_eq!(m.version, "1.0.0");
        assert_eq!(m.tool_type, ToolType::Script);
        assert_eq!(m.executor_id.as_deref(), Some("node_runtime"));
        assert_eq!(m.entrypoint.as_deref(), Some("hello.js"));
        // Docstring backfills the description.
        assert_eq!(m.description, "Say hello through the node runtime.");
    }

    #[test]
    fn test_parse_metadata_map() {
        let parsed = parse_tool(MAP_STYLE, ".py").unwrap();
        let m = &parsed.metadata;
        assert_eq!(m.name, "node_runtime");
        assert_eq!(m.version, "1.4.0");
        assert_eq!(m.tool_type, ToolType::Runtime);
        assert_eq!(m.executor_id.as_deref(), Some("subprocess"));
        assert!(!m.mutates_state);
        assert_eq!(m.config["interpreter"], "node");
        assert_eq!(m.config["timeout"], 60);
    }

    #[test]
    fn test_version_defaults_to_unsigned() {
        let parsed = parse_tool("name = \"bare\"\n", ".py").unwrap();
        assert_eq!(parsed.metadata.version, UNSIGNED_VERSION);
    }

    #[test]
    fn test_tool_type_from_extension() {
        let parsed = parse_tool("name = \"x\"\n", ".sh").unwrap();
        assert_eq!(parsed.metadata.tool_type, ToolType::Bash);
    }

    #[test]
    fn test_signature_stripped_from_raw() {
        let signed = format!(
            "{}\n# Signature: kiwi-mcp:validated:abc:SIGNATURE:hello_node\n",
            ASSIGNMENT_STYLE
        );
        let parsed = parse_tool(&signed, ".py").unwrap();
        assert!(!parsed.raw.contains("kiwi-mcp:validated"));
    }

    #[test]
    fn test_unbalanced_map_is_parse_error() {
        let bad = "TOOL_METADATA = {\n  'name': 'x',\n";
        assert!(matches!(
            parse_tool(bad, ".py").unwrap_err(),
            ArtifactError::Parse(_)
        ));
    }

    #[test]
    fn test_unknown_tool_type_rejected() {
        let bad = "TOOL_METADATA = {'name': 'x', 'tool_type': 'alien'}\n";
        assert!(parse_tool(bad, ".py").is_err());
    }

    #[test]
    fn test_manifest_shape() {
        let parsed = parse_tool(MAP_STYLE, ".py").unwrap();
        let manifest = parsed.metadata.manifest();
        assert_eq!(manifest["tool_type"], "runtime");
        assert_eq!(manifest["executor_id"], "subprocess");
        assert_eq!(manifest["mutates_state"], false);
    }

    #[test]
    fn test_trailing_commas_tolerated() {
        let content = "TOOL_METADATA = {\n  'name': 'x',\n  'tags': ['a', 'b',],\n}\n";
        let parsed = parse_tool(content, ".py").unwrap();
        assert_eq!(parsed.metadata.name, "x");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let tricky = "TOOL_METADATA = {'name': 'x', 'description': 'uses {braces} inside'}\n";
        let parsed = parse_tool(tricky, ".py").unwrap();
        assert_eq!(parsed.metadata.description, "uses {braces} inside");
    }

    #[test]
    fn test_executor_object_assignment() {
        let content = r#"name = "runner"
version = "1.0.0"
executor = {'type': 'subprocess', 'timeout': 30}
"#;
        let parsed = parse_tool(content, ".py").unwrap();
        assert_eq!(parsed.metadata.executor_id.as_deref(), Some("subprocess"));
        assert_eq!(parsed.metadata.config["timeout"], 30);
    }
}
