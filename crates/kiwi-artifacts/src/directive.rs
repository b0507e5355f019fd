//! Directive parsing.
//!
//! A directive file is markdown carrying exactly one fenced code block
//! tagged `xml`, whose root is `<directive name="…" version="X.Y.Z">`.
//! The parser enforces structural order (`metadata → inputs →
//! (process | body) → outputs`), rejects unknown elements, and returns
//! both the typed structure and the raw XML body used for hashing.

use crate::error::ArtifactError;
use crate::model::{parse_strict_version, PermissionTag};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

static XML_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```xml\s*(.*?)\s*```").expect("valid regex"));

/// A `<read>`, `<write>`, or `<execute>` declaration with its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecl {
    pub tag: PermissionTag,
    /// Attribute bag, e.g. `{resource: "filesystem", path: "src/**"}`.
    pub attrs: BTreeMap<String, String>,
}

impl PermissionDecl {
    /// Convenience accessor for a single attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Declared type of a directive input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl std::str::FromStr for InputType {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(InputType::String),
            "number" => Ok(InputType::Number),
            "integer" => Ok(InputType::Integer),
            "boolean" => Ok(InputType::Boolean),
            "array" => Ok(InputType::Array),
            "object" => Ok(InputType::Object),
            other => Err(ArtifactError::Structure(format!(
                "unknown input type '{other}'"
            ))),
        }
    }
}

/// One declared directive input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub input_type: InputType,
    pub required: bool,
    pub description: String,
}

/// One process step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Step {
    pub name: String,
    pub description: String,
    pub action: Option<String>,
    pub command: Option<String>,
    pub http: Option<String>,
    pub tool: Option<String>,
}

impl Step {
    /// A step must carry an action, a command, an http call, or a tool ref.
    fn has_action(&self) -> bool {
        self.action.is_some() || self.command.is_some() || self.http.is_some() || self.tool.is_some()
    }
}

/// Declared success/failure outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Outputs {
    pub success: String,
    pub failure: String,
}

/// A fully parsed directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: String,
    pub author: String,
    pub model_tier: String,
    pub permissions: Vec<PermissionDecl>,
    pub inputs: Vec<InputSpec>,
    /// Optional JSON-Schema constraining the inputs as a whole.
    pub input_schema: Option<Value>,
    pub steps: Vec<Step>,
    pub outputs: Option<Outputs>,
    pub mcps: Vec<String>,
}

impl Directive {
    /// Metadata subset entering the integrity payload.
    pub fn integrity_metadata(&self) -> Value {
        serde_json::json!({
            "category": self.category,
            "description": self.description,
            "model_tier": self.model_tier,
        })
    }
}

/// Parser output: the typed directive plus the raw XML body for hashing.
#[derive(Debug, Clone)]
pub struct ParsedDirective {
    pub directive: Directive,
    /// The XML between the fence markers, signature stripped, trimmed.
    pub xml_body: String,
}

/// Parses a directive source file.
///
/// # Errors
///
/// - [`ArtifactError::Parse`] when no (or more than one) `xml` fenced
///   block exists, or the XML itself is malformed.
/// - [`ArtifactError::Structure`] when elements appear out of order, an
///   unknown element is present, or a mandatory attribute is missing.
/// - [`ArtifactError::InvalidVersion`] when the version attribute is not
///   strict `X.Y.Z`.
pub fn parse_directive(content: &str) -> Result<ParsedDirective, ArtifactError> {
    let stripped = kiwi_integrity::strip_signature(content);

    let mut fences = XML_FENCE.captures_iter(&stripped);
    let xml_body = match (fences.next(), fences.next()) {
        (Some(cap), None) => cap[1].trim().to_string(),
        (None, _) => {
            return Err(ArtifactError::Parse(
                "no ```xml fenced block found in directive file".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ArtifactError::Parse(
                "directive file must contain exactly one ```xml fenced block".into(),
            ))
        }
    };

    let root = read_tree(&xml_body)?;
    if root.name != "directive" {
        return Err(ArtifactError::Structure(format!(
            "expected <directive> root element, got <{}>",
            root.name
        )));
    }

    let name = root.attr("name").unwrap_or_default().to_string();
    let version = root.attr("version").unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(ArtifactError::Structure(
            "directive root missing mandatory 'name' attribute".into(),
        ));
    }
    if version.is_empty() {
        return Err(ArtifactError::Structure(
            "directive root missing mandatory 'version' attribute".into(),
        ));
    }
    parse_strict_version(&version)?;

    let mut directive = Directive {
        name,
        version,
        description: String::new(),
        category: String::new(),
        author: String::new(),
        model_tier: String::new(),
        permissions: Vec::new(),
        inputs: Vec::new(),
        input_schema: None,
        steps: Vec::new(),
        outputs: None,
        mcps: Vec::new(),
    };

    // Sections must appear in this order; a later section may be absent
    // but may not precede an earlier one.
    let mut last_section = -1i32;
    for child in &root.children {
        let section = match child.name.as_str() {
            "metadata" => 0,
            "inputs" => 1,
            "process" | "body" => 2,
            "outputs" => 3,
            other => {
                return Err(ArtifactError::Structure(format!(
                    "unknown element <{other}> in <directive>"
                )))
            }
        };
        if section < last_section {
            return Err(ArtifactError::Structure(format!(
                "element <{}> out of order: expected metadata → inputs → (process|body) → outputs",
                child.name
            )));
        }
        last_section = section;

        match child.name.as_str() {
            "metadata" => parse_metadata(child, &mut directive)?,
            "inputs" => parse_inputs(child, &mut directive)?,
            "process" | "body" => parse_process(child, &mut directive)?,
            "outputs" => directive.outputs = Some(parse_outputs(child)),
            _ => unreachable!(),
        }
    }

    Ok(ParsedDirective {
        directive,
        xml_body,
    })
}

fn parse_metadata(node: &XmlNode, directive: &mut Directive) -> Result<(), ArtifactError> {
    for child in &node.children {
        match child.name.as_str() {
            "description" => directive.description = child.text.trim().to_string(),
            "category" => directive.category = child.text.trim().to_string(),
            "author" => directive.author = child.text.trim().to_string(),
            "model" => {
                directive.model_tier = child.attr("tier").unwrap_or("general").to_string();
            }
            "permissions" => {
                for perm in &child.children {
                    let tag = match perm.name.as_str() {
                        "read" => PermissionTag::Read,
                        "write" => PermissionTag::Write,
                        "execute" => PermissionTag::Execute,
                        other => {
                            return Err(ArtifactError::Structure(format!(
                                "unknown permission tag <{other}>"
                            )))
                        }
                    };
                    directive.permissions.push(PermissionDecl {
                        tag,
                        attrs: perm.attrs.clone(),
                    });
                }
            }
            "mcps" => {
                for mcp in &child.children {
                    if let Some(name) = mcp.attr("name") {
                        directive.mcps.push(name.to_string());
                    }
                }
            }
            other => {
                return Err(ArtifactError::Structure(format!(
                    "unknown element <{other}> in <metadata>"
                )))
            }
        }
    }
    Ok(())
}

fn parse_inputs(node: &XmlNode, directive: &mut Directive) -> Result<(), ArtifactError> {
    for child in &node.children {
        match child.name.as_str() {
            "input" => {
                let name = child
                    .attr("name")
                    .ok_or_else(|| {
                        ArtifactError::Structure("<input> missing 'name' attribute".into())
                    })?
                    .to_string();
                let input_type: InputType =
                    child.attr("type").unwrap_or("string").parse()?;
                let required = child.attr("required").unwrap_or("false") == "true";
                directive.inputs.push(InputSpec {
                    name,
                    input_type,
                    required,
                    description: child.text.trim().to_string(),
                });
            }
            "schema" => {
                let schema: Value = serde_json::from_str(child.text.trim()).map_err(|e| {
                    ArtifactError::Parse(format!("invalid JSON in <schema>: {e}"))
                })?;
                directive.input_schema = Some(schema);
            }
            other => {
                return Err(ArtifactError::Structure(format!(
                    "unknown element <{other}> in <inputs>"
                )))
            }
        }
    }
    Ok(())
}

fn parse_process(node: &XmlNode, directive: &mut Directive) -> Result<(), ArtifactError> {
    for (i, child) in node.children.iter().enumerate() {
        if child.name != "step" {
            return Err(ArtifactError::Structure(format!(
                "unknown element <{}> in <{}>",
                child.name, node.name
            )));
        }
        let mut step = Step {
            name: child.attr("name").unwrap_or_default().to_string(),
            description: child.attr("description").unwrap_or_default().to_string(),
            ..Step::default()
        };
        if step.name.is_empty() {
            return Err(ArtifactError::Structure(format!(
                "process step {i} missing 'name' attribute"
            )));
        }
        for part in &child.children {
            let text = part.text.trim().to_string();
            match part.name.as_str() {
                "action" => step.action = Some(text),
                "description" => step.description = text,
                "command" => step.command = Some(text),
                "http" => step.http = Some(text),
                "tool" => step.tool = Some(text),
                other => {
                    return Err(ArtifactError::Structure(format!(
                        "unknown element <{other}> in <step>"
                    )))
                }
            }
        }
        // A bare <step> body counts as its action.
        if step.action.is_none() && !child.text.trim().is_empty() {
            step.action = Some(child.text.trim().to_string());
        }
        if !step.has_action() {
            return Err(ArtifactError::Structure(format!(
                "process step '{}' has no action, command, http, or tool",
                step.name
            )));
        }
        directive.steps.push(step);
    }
    Ok(())
}

fn parse_outputs(node: &XmlNode) -> Outputs {
    let mut outputs = Outputs::default();
    for child in &node.children {
        match child.name.as_str() {
            "success" => outputs.success = child.text.trim().to_string(),
            "failure" => outputs.failure = child.text.trim().to_string(),
            _ => {}
        }
    }
    outputs
}

/// Lightweight XML tree node. The directive grammar is small enough that
/// building a tree first keeps the section walkers readable.
struct XmlNode {
    name: String,
    attrs: BTreeMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

fn read_tree(xml: &str) -> Result<XmlNode, ArtifactError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ArtifactError::Parse(format!("invalid XML: {e}")))?;
        match event {
            Event::Start(start) => {
                stack.push(node_from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ArtifactError::Parse("unbalanced XML end tag".into()))?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| ArtifactError::Parse(format!("invalid XML text: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&unescaped);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Event::Eof => break,
            // Declarations, comments, and processing instructions carry no
            // directive content.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ArtifactError::Parse("unclosed XML element".into()));
    }
    root.ok_or_else(|| ArtifactError::Parse("empty XML document".into()))
}

fn node_from_start(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<XmlNode, ArtifactError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ArtifactError::Parse(format!("invalid attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ArtifactError::Parse(format!("invalid attribute value: {e}")))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(XmlNode {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), ArtifactError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(ArtifactError::Parse(
            "multiple root elements in XML document".into(),
        ))
    }
}
