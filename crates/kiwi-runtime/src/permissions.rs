//! Permission context and the per-call checker.
//!
//! A directive's `<permission>` declarations compile into glob allow-lists
//! per direction (read, write), a tool allow-list, a shell command
//! allow-list, and an MCP allow-list. The checker evaluates each proposed
//! tool call against a verified capability token plus these lists.
//!
//! Globs use Unix semantics: `*` matches within one path segment, `**`
//! matches across segments. A literal `*` pattern allows everything.

use crate::capability::CapabilityToken;
use globset::{GlobBuilder, GlobMatcher};
use kiwi_artifacts::{PermissionDecl, PermissionTag};
use serde_json::Value;
use tracing::warn;

/// Params keys recognized as filesystem paths.
const FILE_PARAM_KEYS: &[&str] = &["path", "file_path", "filePath", "input_file", "output_file"];

/// Substrings of a tool id or param key that indicate a write.
const WRITE_INDICATORS: &[&str] = &[
    "output", "write", "save", "create", "edit", "update", "delete",
];

/// Result of a permission check.
///
/// `annealing_hint` is machine-readable remediation: the exact permission
/// declaration that would make the denied call pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub reason: String,
    pub annealing_hint: String,
}

impl CheckResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            annealing_hint: String::new(),
        }
    }

    fn deny(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            annealing_hint: hint.into(),
        }
    }
}

/// One compiled allow-list.
#[derive(Debug, Default)]
struct PatternList {
    patterns: Vec<String>,
    matchers: Vec<GlobMatcher>,
}

impl PatternList {
    fn add(&mut self, pattern: &str) {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                self.patterns.push(pattern.to_string());
                self.matchers.push(glob.compile_matcher());
            }
            Err(e) => warn!(pattern, error = %e, "skipping unparseable permission glob"),
        }
    }

    fn matches(&self, target: &str) -> bool {
        self.patterns
            .iter()
            .zip(&self.matchers)
            .any(|(pattern, matcher)| pattern == "*" || matcher.is_match(target))
    }
}

/// Compiled permission context for one directive.
#[derive(Debug, Default)]
pub struct PermissionContext {
    filesystem_read: PatternList,
    filesystem_write: PatternList,
    tool_execute: PatternList,
    shell_commands: PatternList,
    mcp_access: PatternList,
}

impl PermissionContext {
    /// Builds a context from parsed `<permission>` declarations.
    pub fn from_decls(decls: &[PermissionDecl]) -> Self {
        let mut ctx = Self::default();

        for decl in decls {
            let resource = decl.attr("resource").unwrap_or_default();
            match decl.tag {
                PermissionTag::Read => {
                    if resource == "filesystem" {
                        if let Some(path) = decl.attr("path") {
                            ctx.filesystem_read.add(path);
                        }
                    }
                }
                PermissionTag::Write => {
                    if resource == "filesystem" {
                        if let Some(path) = decl.attr("path") {
                            ctx.filesystem_write.add(path);
                        }
                    }
                }
                PermissionTag::Execute => match resource {
                    "tool" => {
                        if let Some(id) = decl.attr("id").or_else(|| decl.attr("action")) {
                            ctx.tool_execute.add(id);
                        }
                    }
                    "shell" => {
                        if let Some(action) = decl.attr("action") {
                            ctx.shell_commands.add(action);
                        }
                    }
                    other => {
                        if let Some(mcp) = other.strip_prefix("mcp:") {
                            ctx.mcp_access.add(mcp);
                        }
                    }
                },
            }
        }
        ctx
    }

    pub fn can_read(&self, path: &str) -> bool {
        self.filesystem_read.matches(path)
    }

    pub fn can_write(&self, path: &str) -> bool {
        self.filesystem_write.matches(path)
    }

    pub fn can_execute_tool(&self, tool_id: &str) -> bool {
        self.tool_execute.matches(tool_id)
    }

    /// Checks the head token of a shell command against the allow-list.
    pub fn can_run_command(&self, command: &str) -> bool {
        let head = command.split_whitespace().next().unwrap_or("");
        self.shell_commands.matches(head)
    }

    pub fn can_access_mcp(&self, mcp_name: &str) -> bool {
        self.mcp_access.matches(mcp_name)
    }
}

/// Evaluates proposed tool calls against a token and a context.
#[derive(Debug)]
pub struct PermissionChecker {
    context: PermissionContext,
}

impl PermissionChecker {
    pub fn new(context: PermissionContext) -> Self {
        Self { context }
    }

    /// Full check for one call, in order: token capability, then file
    /// params per direction, then shell command.
    pub fn check_tool_call(
        &self,
        token: &CapabilityToken,
        tool_id: &str,
        params: &Value,
    ) -> CheckResult {
        if !token.has_capability(&format!("tool.{tool_id}")) {
            return CheckResult::deny(
                format!("Tool '{tool_id}' not in permitted tool list"),
                format!("add <execute resource='tool' id='{tool_id}'/> to directive permissions"),
            );
        }

        let Some(map) = params.as_object() else {
            return CheckResult::allow();
        };

        for key in FILE_PARAM_KEYS {
            let Some(path) = map.get(*key).and_then(Value::as_str) else {
                continue;
            };
            if is_write_operation(tool_id, key) {
                if !self.context.can_write(path) {
                    return CheckResult::deny(
                        format!("Write access denied for path: {path}"),
                        format!(
                            "add <write resource='filesystem' path='{path}'/> to directive permissions"
                        ),
                    );
                }
            } else if !self.context.can_read(path) {
                return CheckResult::deny(
                    format!("Read access denied for path: {path}"),
                    format!(
                        "add <read resource='filesystem' path='{path}'/> to directive permissions"
                    ),
                );
            }
        }

        if let Some(command) = map.get("command").and_then(Value::as_str) {
            if !self.context.can_run_command(command) {
                let head = command.split_whitespace().next().unwrap_or("");
                return CheckResult::deny(
                    format!("Shell command '{head}' not permitted"),
                    format!(
                        "add <execute resource='shell' action='{head}'/> to directive permissions"
                    ),
                );
            }
        }

        CheckResult::allow()
    }
}

/// A param names a write when the tool id or the key itself carries a
/// write indicator.
fn is_write_operation(tool_id: &str, param_key: &str) -> bool {
    let tool = tool_id.to_lowercase();
    let key = param_key.to_lowercase();
    WRITE_INDICATORS
        .iter()
        .any(|ind| tool.contains(ind) || key.contains(ind))
}
