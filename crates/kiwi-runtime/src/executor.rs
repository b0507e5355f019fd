//! Primitive executor contract.
//!
//! The kernel never runs subprocesses or HTTP calls itself; it hands the
//! resolved manifest and params to a [`ToolExecutor`] implementation
//! supplied at the edge. Timeouts default per transport and are
//! overridable from the tool's manifest `config.timeout`.

use async_trait::async_trait;
use serde_json::Value;

/// Default subprocess execution timeout.
pub const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 60;
/// Default HTTP call timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Default embedding inference timeout.
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Result of one primitive execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn ok(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// A primitive that ultimately runs tools (subprocess, HTTP, …).
///
/// Implementations live outside the kernel; the proxy only relies on this
/// contract.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Executes a tool given its parsed manifest and call params.
    async fn execute(&self, tool_id: &str, manifest: &Value, params: &Value) -> ExecutionOutcome;

    /// Whether this executor can handle the given manifest.
    fn can_execute(&self, manifest: &Value) -> bool;
}

/// Effective timeout for a manifest: `config.timeout` override, else the
/// transport default.
pub fn effective_timeout_secs(manifest: &Value, default_secs: u64) -> u64 {
    manifest
        .pointer("/config/timeout")
        .and_then(Value::as_u64)
        .unwrap_or(default_secs)
}
