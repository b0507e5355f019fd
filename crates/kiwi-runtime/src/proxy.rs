//! The tool proxy: single entry point for every tool call.

use crate::audit::AuditLogger;
use crate::capability::CapabilityToken;
use crate::executor::{
    effective_timeout_secs, ExecutionOutcome, ToolExecutor, DEFAULT_SUBPROCESS_TIMEOUT_SECS,
};
use crate::loop_detector::LoopDetector;
use crate::permissions::PermissionChecker;
use kiwi_artifacts::{parse_tool, ArtifactKind};
use kiwi_paths::{PathService, SearchScope};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result returned to the caller of [`ToolProxy::call_tool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Remediation hint carried on denials and stuck signals.
    pub annealing_hint: Option<String>,
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    fn failure(error: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            annealing_hint: hint,
            duration_ms: None,
        }
    }
}

/// Central proxy: loop check → permission check → load → execute → audit.
///
/// The proxy is stateful only in that it owns one loop detector per
/// session. A stuck call is never executed; the detector acts as
/// admission control.
pub struct ToolProxy {
    checker: PermissionChecker,
    executor: Arc<dyn ToolExecutor>,
    audit: AuditLogger,
    paths: Arc<PathService>,
    detector: Mutex<LoopDetector>,
}

impl ToolProxy {
    pub fn new(
        checker: PermissionChecker,
        executor: Arc<dyn ToolExecutor>,
        audit: AuditLogger,
        paths: Arc<PathService>,
    ) -> Self {
        Self {
            checker,
            executor,
            audit,
            paths,
            detector: Mutex::new(LoopDetector::default()),
        }
    }

    /// Executes a tool call with full enforcement and no external
    /// cancellation.
    pub async fn call_tool(
        &self,
        token: &CapabilityToken,
        tool_id: &str,
        params: &Value,
        session_id: &str,
    ) -> ToolResult {
        self.call_tool_with_cancel(token, tool_id, params, session_id, &CancellationToken::new())
            .await
    }

    /// Executes a tool call with full enforcement. Cancelling `cancel`
    /// abandons the underlying execution and returns a cancelled result
    /// rather than partial output.
    pub async fn call_tool_with_cancel(
        &self,
        token: &CapabilityToken,
        tool_id: &str,
        params: &Value,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let started = Instant::now();

        // 1. Loop check. The flagged call is not executed.
        if let Some(stuck) = self.detector.lock().record_call(tool_id, params) {
            warn!(tool_id, pattern = stuck.pattern_type.as_str(), "stuck pattern detected");
            self.audit.log_stuck_detected(session_id, &stuck, tool_id);
            return ToolResult::failure(
                format!("Stuck pattern detected: {}", stuck.reason),
                Some(stuck.suggestion),
            );
        }

        // 2. Permission check, audited regardless of outcome.
        let check = self.checker.check_tool_call(token, tool_id, params);
        self.audit
            .log_permission_check(session_id, tool_id, &check, Some(params));
        if !check.allowed {
            return ToolResult::failure(
                format!("Permission denied: {}", check.reason),
                Some(check.annealing_hint),
            );
        }

        // 3. Load tool metadata. Missing is a non-fatal not-found.
        let Some(manifest) = self.load_manifest(tool_id) else {
            let error = format!("Tool '{tool_id}' not found");
            self.audit.log_error(session_id, tool_id, &error, Some(params));
            return ToolResult::failure(
                error,
                Some("Check tool name spelling or create the tool".to_string()),
            );
        };

        // 4. Execute through the primitive executor, bounded by the
        // manifest timeout and the caller's cancellation handle.
        let timeout = Duration::from_secs(effective_timeout_secs(
            &manifest,
            DEFAULT_SUBPROCESS_TIMEOUT_SECS,
        ));
        let outcome = tokio::select! {
            // Cancellation takes precedence over a simultaneously ready
            // execution result.
            biased;
            _ = cancel.cancelled() => {
                let error = format!("Tool '{tool_id}' cancelled");
                self.audit.log_error(session_id, tool_id, &error, Some(params));
                return ToolResult::failure(error, None);
            }
            result = tokio::time::timeout(timeout, self.executor.execute(tool_id, &manifest, params)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => ExecutionOutcome::failed(
                        format!("Execution timed out after {}s", timeout.as_secs()),
                        started.elapsed().as_millis() as u64,
                    ),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        // 5. Audit the terminal outcome.
        self.audit.log_execution(
            session_id,
            tool_id,
            outcome.success,
            outcome.output.len(),
            outcome.error.as_deref(),
            Some(params),
            duration_ms,
        );
        debug!(tool_id, success = outcome.success, duration_ms, "tool call finished");

        ToolResult {
            success: outcome.success,
            output: Some(outcome.output),
            error: outcome.error,
            annealing_hint: None,
            duration_ms: Some(duration_ms),
        }
    }

    /// Resets the session's loop detector.
    pub fn reset_loop_detector(&self) {
        self.detector.lock().reset();
    }

    /// Recent audit records for this proxy's log.
    pub fn audit_history(&self, session_id: Option<&str>, limit: usize) -> Vec<crate::AuditEntry> {
        self.audit.recent_entries(session_id, limit)
    }

    fn load_manifest(&self, tool_id: &str) -> Option<Value> {
        let resolution = self
            .paths
            .resolve(ArtifactKind::Tool, tool_id, SearchScope::Local);
        let path = resolution.path?;
        let content = std::fs::read_to_string(&path).ok()?;
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        parse_tool(&content, &extension)
            .map(|parsed| parsed.metadata.manifest())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mint_token;
    use crate::executor::ExecutionOutcome;
    use crate::permissions::PermissionContext;
    use async_trait::async_trait;
    use kiwi_artifacts::{PermissionDecl, PermissionTag};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Echo executor counting invocations.
    struct EchoExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, tool_id: &str, _manifest: &Value, params: &Value) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome::ok(format!("{tool_id}: {params}"), 1)
        }

        fn can_execute(&self, _manifest: &Value) -> bool {
            true
        }
    }

    fn decl(tag: PermissionTag, attrs: &[(&str, &str)]) -> PermissionDecl {
        PermissionDecl {
            tag,
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn fixture() -> (TempDir, ToolProxy, Arc<EchoExecutor>) {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let tools = project.join(".ai/tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(
            tools.join("echo_tool.py"),
            "TOOL_METADATA = {'name': 'echo_tool', 'version': '1.0.0', 'tool_type': 'primitive'}\n",
        )
        .unwrap();

        let paths = Arc::new(PathService::with_user_space(
            Some(project.clone()),
            dir.path().join("userspace"),
        ));
        let context = PermissionContext::from_decls(&[
            decl(PermissionTag::Execute, &[("resource", "tool"), ("id", "echo_tool")]),
            decl(
                PermissionTag::Read,
                &[("resource", "filesystem"), ("path", "**")],
            ),
        ]);
        let executor = Arc::new(EchoExecutor {
            calls: AtomicUsize::new(0),
        });
        let proxy = ToolProxy::new(
            PermissionChecker::new(context),
            executor.clone(),
            AuditLogger::new(&project),
            paths,
        );
        (dir, proxy, executor)
    }

    fn token() -> CapabilityToken {
        mint_token(vec!["tool.echo_tool".into()], "d", "t", None, 1)
    }

    #[tokio::test]
    async fn test_successful_call_audited() {
        let (_dir, proxy, executor) = fixture();

        let result = proxy
            .call_tool(&token(), "echo_tool", &json!({"q": 1}), "s1")
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.output.unwrap().starts_with("echo_tool"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let history = proxy.audit_history(Some("s1"), 10);
        // Permission check plus execution.
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_not_executed() {
        let (_dir, proxy, executor) = fixture();
        let no_caps = mint_token(vec![], "d", "t", None, 1);

        let result = proxy
            .call_tool(&no_caps, "echo_tool", &json!({}), "s1")
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Permission denied"));
        assert!(result.annealing_hint.unwrap().contains("echo_tool"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stuck_call_not_executed() {
        let (_dir, proxy, executor) = fixture();
        let params = json!({"q": "same"});

        for _ in 0..2 {
            assert!(proxy
                .call_tool(&token(), "echo_tool", &params, "s1")
                .await
                .success);
        }
        let third = proxy.call_tool(&token(), "echo_tool", &params, "s1").await;
        assert!(!third.success);
        assert!(third.error.unwrap().contains("Stuck pattern"));
        assert!(third.annealing_hint.is_some());
        // Only the two admitted calls ran.
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        let history = proxy.audit_history(Some("s1"), 20);
        assert!(history
            .iter()
            .any(|e| matches!(e.event_type, crate::AuditEventType::StuckDetected)));
    }

    #[tokio::test]
    async fn test_missing_tool_non_fatal() {
        let (_dir, proxy, _executor) = fixture();
        let token = mint_token(vec!["tool.ghost".into()], "d", "t", None, 1);

        let result = proxy.call_tool(&token, "ghost", &json!({}), "s1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert!(result.annealing_hint.unwrap().contains("spelling"));
    }

    /// Executor that never finishes on its own.
    struct HangingExecutor;

    #[async_trait]
    impl ToolExecutor for HangingExecutor {
        async fn execute(&self, _: &str, _: &Value, _: &Value) -> ExecutionOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ExecutionOutcome::ok("", 0)
        }

        fn can_execute(&self, _manifest: &Value) -> bool {
            true
        }
    }

    fn hanging_fixture() -> (TempDir, ToolProxy) {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let tools = project.join(".ai/tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(
            tools.join("slow_tool.py"),
            "TOOL_METADATA = {'name': 'slow_tool', 'version': '1.0.0', 'tool_type': 'primitive', 'config': {'timeout': 0}}\n",
        )
        .unwrap();

        let paths = Arc::new(PathService::with_user_space(
            Some(project.clone()),
            dir.path().join("userspace"),
        ));
        let context = PermissionContext::from_decls(&[decl(
            PermissionTag::Execute,
            &[("resource", "tool"), ("id", "slow_tool")],
        )]);
        let proxy = ToolProxy::new(
            PermissionChecker::new(context),
            Arc::new(HangingExecutor),
            AuditLogger::new(&project),
            paths,
        );
        (dir, proxy)
    }

    #[tokio::test]
    async fn test_manifest_timeout_bounds_execution() {
        let (_dir, proxy) = hanging_fixture();
        let token = mint_token(vec!["tool.slow_tool".into()], "d", "t", None, 1);

        let result = proxy.call_tool(&token, "slow_tool", &json!({}), "s1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_execution() {
        let (_dir, proxy) = hanging_fixture();
        let token = mint_token(vec!["tool.slow_tool".into()], "d", "t", None, 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = proxy
            .call_tool_with_cancel(&token, "slow_tool", &json!({}), "s1", &cancel)
            .await;
        assert!(!result.success);
        // No partial output survives a cancel.
        assert!(result.output.is_none());
        assert!(result.error.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_reset_loop_detector() {
        let (_dir, proxy, _executor) = fixture();
        let params = json!({"q": "same"});
        for _ in 0..2 {
            proxy.call_tool(&token(), "echo_tool", &params, "s1").await;
        }
        proxy.reset_loop_detector();
        assert!(proxy
            .call_tool(&token(), "echo_tool", &params, "s1")
            .await
            .success);
    }
}
