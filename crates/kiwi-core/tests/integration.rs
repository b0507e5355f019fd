//! End-to-end integration tests for the kernel facade.
//!
//! Each test builds a real project tree under a tempdir, signs artifacts
//! through the kernel, and drives the full pipeline: resolve → verify →
//! freeze → load → execute.

use async_trait::async_trait;
use kiwi_core::{
    ArtifactKind, Kernel, KernelConfig, KernelError, LockfileMode, Scope, ToolExecutor,
};
use kiwi_runtime::ExecutionOutcome;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn execute(&self, tool_id: &str, _manifest: &Value, params: &Value) -> ExecutionOutcome {
        ExecutionOutcome::ok(format!("{tool_id} ran with {params}"), 1)
    }

    fn can_execute(&self, _manifest: &Value) -> bool {
        true
    }
}

fn write_tool(tools_dir: &Path, id: &str, tool_type: &str, executor: Option<&str>, version: &str) {
    let executor_line = match executor {
        Some(e) => format!("'executor_id': '{e}', "),
        None => String::new(),
    };
    let body = format!(
        "TOOL_METADATA = {{'name': '{id}', 'version': '{version}', 'tool_type': '{tool_type}', {executor_line}'description': '{id} tool'}}\n"
    );
    std::fs::write(tools_dir.join(format!("{id}.py")), body).unwrap();
}

fn write_directive(dir: &Path, name: &str) {
    let content = format!(
        r#"# {name}

```xml
<directive name="{name}" version="1.0.0">
  <metadata>
    <description>Runs the echo tool</description>
    <category>ops</category>
    <model tier="standard"/>
    <permissions>
      <read resource="filesystem" path="**"/>
      <execute resource="tool" id="echo_tool"/>
    </permissions>
  </metadata>
  <process>
    <step name="run"><tool>echo_tool</tool></step>
  </process>
</directive>
```
"#
    );
    std::fs::write(dir.join(format!("{name}.md")), content).unwrap();
}

/// Project tree with a signed three-link chain and a directive.
fn fixture() -> (TempDir, Kernel) {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    let tools = project.join(".ai/tools");
    let directives = project.join(".ai/directives");
    std::fs::create_dir_all(&tools).unwrap();
    std::fs::create_dir_all(&directives).unwrap();

    write_tool(&tools, "hello_node", "script", Some("node_runtime"), "1.0.0");
    write_tool(&tools, "node_runtime", "primitive", None, "1.4.0");
    write_tool(&tools, "echo_tool", "primitive", None, "1.0.0");
    write_directive(&directives, "run_echo");

    let mut config = KernelConfig::default();
    config.paths.project_root = Some(project);
    config.paths.user_space = Some(dir.path().join("userspace"));
    let kernel = Kernel::new(config);

    for id in ["hello_node", "node_runtime", "echo_tool"] {
        kernel.sign(ArtifactKind::Tool, id).unwrap();
    }
    (dir, kernel)
}

#[test]
fn sign_then_resolve_and_verify() {
    let (_dir, kernel) = fixture();

    let chain = kernel.resolve_chain("hello_node").unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].tool_id, "hello_node");
    assert_eq!(chain[1].tool_id, "node_runtime");

    let report = kernel.verify("hello_node").unwrap();
    assert!(report.verification.success);
    assert_eq!(report.verification.verified_count, 2);
    // No lockfile yet.
    assert!(report.lockfile.is_none());
}

#[test]
fn unsigned_tool_fails_resolution() {
    let (dir, kernel) = fixture();
    let tools = dir.path().join("project/.ai/tools");
    write_tool(&tools, "fresh", "script", Some("node_runtime"), "1.0.0");

    let err = kernel.resolve_chain("fresh").unwrap_err();
    assert!(matches!(err, KernelError::Chain(_)));
    assert!(err.to_string().contains("no signature"));
}

#[test]
fn tampered_tool_fails_verification() {
    let (dir, kernel) = fixture();
    let path = dir.path().join("project/.ai/tools/node_runtime.py");

    // Bump the version without re-signing.
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("'1.4.0'", "'1.5.0'")).unwrap();
    kernel.invalidate_caches();

    let err = kernel.verify("hello_node").unwrap_err();
    match err {
        KernelError::Verification(message) => {
            assert!(message.contains("Integrity mismatch"), "{message}");
        }
        other => panic!("expected Verification, got {other:?}"),
    }
}

#[test]
fn freeze_load_validate_roundtrip() {
    let (dir, kernel) = fixture();

    let (lockfile, path) = kernel.freeze("hello_node").unwrap();
    assert!(path.starts_with(dir.path().join("project/.ai/lockfiles")));
    assert_eq!(lockfile.root.tool_id, "hello_node");
    assert_eq!(lockfile.resolved_chain.len(), 2);

    // A later verify finds and confirms the lockfile.
    let report = kernel.verify("hello_node").unwrap();
    let check = report.lockfile.unwrap();
    assert!(check.valid, "{:?}", check.issues);
}

#[test]
fn strict_mode_fails_on_lockfile_mismatch() {
    let (dir, _kernel) = fixture();

    // Rebuild the kernel in strict mode over the same tree.
    let mut config = KernelConfig::default();
    config.paths.project_root = Some(dir.path().join("project"));
    config.paths.user_space = Some(dir.path().join("userspace"));
    config.lockfile.mode = LockfileMode::Strict;
    let kernel = Kernel::new(config);

    kernel.freeze("hello_node").unwrap();

    // Re-sign the runtime at a new version: the chain drifts from the pin.
    let path = dir.path().join("project/.ai/tools/node_runtime.py");
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("'1.4.0'", "'2.0.0'")).unwrap();
    kernel.sign(ArtifactKind::Tool, "node_runtime").unwrap();
    kernel.invalidate_caches();

    let err = kernel.verify("hello_node").unwrap_err();
    assert!(matches!(err, KernelError::LockfileMismatch { .. }));
}

#[test]
fn warn_mode_reports_and_proceeds() {
    let (dir, kernel) = fixture();
    kernel.freeze("hello_node").unwrap();

    let path = dir.path().join("project/.ai/tools/node_runtime.py");
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("'1.4.0'", "'2.0.0'")).unwrap();
    kernel.sign(ArtifactKind::Tool, "node_runtime").unwrap();
    kernel.invalidate_caches();

    // Default mode is warn: verification succeeds, the check reports.
    let report = kernel.verify("hello_node").unwrap();
    let check = report.lockfile.unwrap();
    assert!(!check.valid);
    assert!(!check.issues.is_empty());
}

#[tokio::test]
async fn session_executes_permitted_calls() {
    let (_dir, kernel) = fixture();
    let session = kernel
        .start_session("run_echo", Arc::new(EchoExecutor))
        .unwrap();

    assert!(session.token.has_capability("tool.echo_tool"));
    assert!(session.token.has_capability("fs.read"));

    let result = session.call_tool("echo_tool", &json!({"msg": "hi"})).await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.output.unwrap().contains("echo_tool ran"));

    // Audit captured the permission check and the execution.
    let history = session.audit_history(10);
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn session_denies_undeclared_tool() {
    let (_dir, kernel) = fixture();
    let session = kernel
        .start_session("run_echo", Arc::new(EchoExecutor))
        .unwrap();

    let result = session.call_tool("hello_node", &json!({})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Permission denied"));
    assert!(result
        .annealing_hint
        .unwrap()
        .contains("<execute resource='tool' id='hello_node'/>"));
}

#[tokio::test]
async fn session_token_roundtrips_through_transport() {
    let (_dir, kernel) = fixture();
    let session = kernel
        .start_session("run_echo", Arc::new(EchoExecutor))
        .unwrap();

    let verified = kernel.verify_token(&session.transport).unwrap();
    assert_eq!(verified.caps, session.token.caps);
    assert_eq!(verified.directive_id, "run_echo");

    assert!(kernel.verify_token("garbage").is_none());
}

#[test]
fn index_and_search_local_artifacts() {
    let (dir, kernel) = fixture();
    let knowledge = dir.path().join("project/.ai/knowledge");
    std::fs::create_dir_all(&knowledge).unwrap();
    std::fs::write(
        knowledge.join("20260101-node-tips.md"),
        "---\nzettel_id: 20260101-node-tips\ntitle: Node Tips\nversion: 1.0.0\nentry_type: learning\n---\nPrefer streams for large files.\n",
    )
    .unwrap();

    let indexed = kernel.index_local().unwrap();
    assert!(indexed >= 5, "tools, directive, and knowledge: {indexed}");

    let hits = kernel.search_local("node", None);
    assert!(!hits.is_empty());

    let knowledge_only = kernel.search_local("node", Some(ArtifactKind::Knowledge));
    assert_eq!(knowledge_only.len(), 1);
    assert_eq!(knowledge_only[0].item_id, "20260101-node-tips");
}

#[test]
fn lockfile_prune_respects_threshold() {
    let (_dir, kernel) = fixture();
    kernel.freeze("hello_node").unwrap();

    // Everything is fresh; nothing is pruned at the default threshold.
    assert_eq!(kernel.prune_lockfiles(), 0);
    assert_eq!(kernel.lockfiles().list(None, Some(Scope::Project)).len(), 1);
}
