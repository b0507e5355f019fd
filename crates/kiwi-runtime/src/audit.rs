//! Append-only JSONL audit logging with secret redaction.
//!
//! One file per local date under `{project}/.ai/logs/audit/`. Audit
//! writes must never fail the operation being audited: IO failures are
//! mirrored to stderr and swallowed.

use crate::loop_detector::StuckSignal;
use crate::permissions::CheckResult;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;

/// Keys whose values are always redacted (substring match, case folded).
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "secret",
    "auth",
    "credential",
    "private_key",
    "access_token",
    "refresh_token",
];

/// Maximum string value length before truncation.
const MAX_VALUE_LEN: usize = 1000;

/// Audit record event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PermissionCheck,
    Execution,
    Error,
    StuckDetected,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<Utc>,
    pub session_id: String,
    pub event_type: AuditEventType,
    pub tool_id: String,
    pub details: Value,
}

/// JSONL audit logger for one session directory.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_file: PathBuf,
}

impl AuditLogger {
    /// `project_root` is the directory holding `.ai/`. The daily file
    /// name uses the local date, matching operator expectations when
    /// tailing logs.
    pub fn new(project_root: &std::path::Path) -> Self {
        let log_dir = project_root.join(".ai").join("logs").join("audit");
        let today = Local::now().format("%Y-%m-%d");
        Self {
            log_file: log_dir.join(format!("{today}.jsonl")),
        }
    }

    pub fn log_permission_check(
        &self,
        session_id: &str,
        tool_id: &str,
        check: &CheckResult,
        params: Option<&Value>,
    ) {
        self.write(AuditEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_type: AuditEventType::PermissionCheck,
            tool_id: tool_id.to_string(),
            details: json!({
                "allowed": check.allowed,
                "reason": check.reason,
                "annealing_hint": check.annealing_hint,
                "params": params.map(sanitize_params).unwrap_or_else(|| json!({})),
            }),
        });
    }

    pub fn log_execution(
        &self,
        session_id: &str,
        tool_id: &str,
        success: bool,
        output_length: usize,
        error: Option<&str>,
        params: Option<&Value>,
        duration_ms: u64,
    ) {
        self.write(AuditEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_type: AuditEventType::Execution,
            tool_id: tool_id.to_string(),
            details: json!({
                "success": success,
                "output_length": output_length,
                "error": error,
                "duration_ms": duration_ms,
                "params": params.map(sanitize_params).unwrap_or_else(|| json!({})),
            }),
        });
    }

    pub fn log_error(&self, session_id: &str, tool_id: &str, error: &str, params: Option<&Value>) {
        self.write(AuditEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_type: AuditEventType::Error,
            tool_id: tool_id.to_string(),
            details: json!({
                "error": error,
                "params": params.map(sanitize_params).unwrap_or_else(|| json!({})),
            }),
        });
    }

    pub fn log_stuck_detected(&self, session_id: &str, signal: &StuckSignal, tool_id: &str) {
        self.write(AuditEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_type: AuditEventType::StuckDetected,
            tool_id: tool_id.to_string(),
            details: json!({
                "pattern_type": signal.pattern_type.as_str(),
                "reason": signal.reason,
                "suggestion": signal.suggestion,
                "calls_involved": signal.calls_involved.len(),
            }),
        });
    }

    /// Recent entries in chronological order, optionally filtered by
    /// session. Malformed lines are skipped, not fatal.
    pub fn recent_entries(&self, session_id: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        let Ok(content) = std::fs::read_to_string(&self.log_file) else {
            return Vec::new();
        };

        let mut entries: Vec<AuditEntry> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .filter(|entry| session_id.map_or(true, |sid| entry.session_id == sid))
            .take(limit)
            .collect();
        entries.reverse();
        entries
    }

    /// Appends one record. Each record is a single `write` call; failures
    /// go to stderr and are swallowed so auditing cannot take down the
    /// audited operation.
    fn write(&self, entry: AuditEntry) {
        let result = (|| -> std::io::Result<()> {
            if let Some(dir) = self.log_file.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut line = serde_json::to_string(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            line.push('\n');

            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)?;
            file.write_all(line.as_bytes())
        })();

        if let Err(e) = result {
            eprintln!("Audit logging failed: {e}");
            eprintln!("Entry: {:?}", entry);
        }
    }
}

/// Redacts secret-bearing keys and truncates oversized string values.
fn sanitize_params(params: &Value) -> Value {
    let Some(map) = params.as_object() else {
        return params.clone();
    };

    let sanitized: serde_json::Map<String, Value> = map
        .iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            if SENSITIVE_KEY_PARTS.iter().any(|s| lower.contains(s)) {
                return (key.clone(), Value::String("[REDACTED]".to_string()));
            }
            if let Some(s) = value.as_str() {
                if s.len() > MAX_VALUE_LEN {
                    let truncated: String = s.chars().take(MAX_VALUE_LEN).collect();
                    return (
                        key.clone(),
                        Value::String(format!("{truncated}...[TRUNCATED]")),
                    );
                }
            }
            (key.clone(), value.clone())
        })
        .collect();

    Value::Object(sanitized)
}
