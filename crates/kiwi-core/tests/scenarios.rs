//! Concrete end-to-end scenarios with literal inputs and expected
//! outputs, covering the kernel's contract surface: lockfile round-trips,
//! token attenuation, cycle detection, stuck-loop admission control,
//! keyword ranking, and signing idempotence.

use kiwi_core::{ArtifactKind, Kernel, KernelConfig, KernelError};
use kiwi_integrity::compute_directive_integrity;
use kiwi_lockfile::validate_against_chain;
use kiwi_runtime::{attenuate_token, mint_token, LoopDetector, PatternType};
use kiwi_search::KeywordSearchEngine;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

fn write_tool(tools_dir: &Path, id: &str, tool_type: &str, executor: Option<&str>, version: &str) {
    let executor_line = match executor {
        Some(e) => format!("'executor_id': '{e}', "),
        None => String::new(),
    };
    let body = format!(
        "TOOL_METADATA = {{'name': '{id}', 'version': '{version}', 'tool_type': '{tool_type}', {executor_line}'description': '{id}'}}\n"
    );
    std::fs::write(tools_dir.join(format!("{id}.py")), body).unwrap();
}

fn kernel_with_project() -> (TempDir, Kernel) {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    std::fs::create_dir_all(project.join(".ai/tools")).unwrap();
    std::fs::create_dir_all(project.join(".ai/directives")).unwrap();

    let mut config = KernelConfig::default();
    config.paths.project_root = Some(project);
    config.paths.user_space = Some(dir.path().join("userspace"));
    (dir, Kernel::new(config))
}

/// Freeze a three-link chain, save it, reload it, and validate; then
/// flip one integrity and watch validation fail with the exact message.
#[test]
fn freeze_save_load_validate_cycle() {
    let (dir, kernel) = kernel_with_project();
    let tools = dir.path().join("project/.ai/tools");
    write_tool(&tools, "hello_node", "script", Some("node_runtime"), "1.0.0");
    write_tool(&tools, "node_runtime", "runtime", Some("subprocess"), "1.4.0");
    // The runtime accepts script children.
    let runtime_body = std::fs::read_to_string(tools.join("node_runtime.py")).unwrap();
    let with_validation = runtime_body.replace(
        "'description': 'node_runtime'",
        "'description': 'node_runtime', 'validation': {'child_schemas': [{'match': {'tool_type': 'script'}, 'schema': {'type': 'object'}}]}",
    );
    std::fs::write(tools.join("node_runtime.py"), with_validation).unwrap();
    write_tool(&tools, "subprocess", "primitive", None, "1.0.0");

    for id in ["hello_node", "node_runtime", "subprocess"] {
        kernel.sign(ArtifactKind::Tool, id).unwrap();
    }

    let (lockfile, path) = kernel.freeze("hello_node").unwrap();
    assert!(path.ends_with(".ai/lockfiles/tools/hello_node@1.0.0.lock.json"));
    assert_eq!(
        lockfile
            .resolved_chain
            .iter()
            .map(|e| e.tool_id.as_str())
            .collect::<Vec<_>>(),
        vec!["hello_node", "node_runtime", "subprocess"]
    );

    let loaded = kernel
        .lockfiles()
        .load("hello_node", "1.0.0", "tools")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.resolved_chain, lockfile.resolved_chain);

    let chain = kernel.resolve_chain("hello_node").unwrap();
    let check = validate_against_chain(&loaded, &chain);
    assert!(check.valid);
    assert!(check.issues.is_empty());

    // Replace the root integrity with a different hash.
    let mut drifted = loaded.clone();
    drifted.resolved_chain[0].integrity = "f".repeat(64);
    let check = validate_against_chain(&drifted, &chain);
    assert!(!check.valid);
    assert_eq!(check.issues.len(), 1);
    assert!(check.issues[0].starts_with("Integrity mismatch for hello_node@1.0.0:"));
}

/// Attenuation is pure set intersection.
#[test]
fn token_attenuation_intersects() {
    let parent = mint_token(
        vec!["fs.read".into(), "fs.write".into(), "spawn.thread".into()],
        "parent",
        "thread-1",
        None,
        1,
    );
    let child = attenuate_token(&parent, &["fs.write".into(), "tool.bash".into()]);
    assert_eq!(child.caps, vec!["fs.write"]);
}

/// A two-tool cycle fails resolution with the walked chain intact.
#[test]
fn cycle_resolution_fails_with_chain_so_far() {
    let (dir, kernel) = kernel_with_project();
    let tools = dir.path().join("project/.ai/tools");
    write_tool(&tools, "a", "script", Some("b"), "1.0.0");
    write_tool(&tools, "b", "runtime", Some("a"), "1.0.0");
    kernel.sign(ArtifactKind::Tool, "a").unwrap();
    kernel.sign(ArtifactKind::Tool, "b").unwrap();

    let err = kernel.resolve_chain("a").unwrap_err();
    match err {
        KernelError::Chain(kiwi_chain::ChainError::CycleDetected {
            chain_so_far,
            repeated,
        }) => {
            assert_eq!(chain_so_far, vec!["a", "b"]);
            assert_eq!(repeated, "a");
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

/// The exact-repeat detector fires on the third identical call and keeps
/// firing on the fourth.
#[test]
fn loop_detector_exact_repeat() {
    let mut detector = LoopDetector::default();
    let params = json!({"path": "x"});

    assert!(detector.record_call("write_file", &params).is_none());
    assert!(detector.record_call("write_file", &params).is_none());

    let third = detector.record_call("write_file", &params).unwrap();
    assert_eq!(third.pattern_type, PatternType::ExactRepeat);

    let fourth = detector.record_call("write_file", &params).unwrap();
    assert_eq!(fourth.pattern_type, PatternType::ExactRepeat);
}

/// Phrase matching ranks the exact-title document first.
#[test]
fn bm25_phrase_ranking() {
    let mut engine = KeywordSearchEngine::new();
    for (id, title) in [
        ("doc1", "Python Testing"),
        ("doc2", "Testing Python Framework"),
    ] {
        engine.index_document(
            id,
            "knowledge",
            HashMap::from([("title".to_string(), title.to_string())]),
            format!("/tmp/{id}.md").into(),
            json!({}),
            None,
        );
    }

    let hits = engine.search("python testing", None, 10, 0.0);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].item_id, "doc1");
}

/// Signing a directive embeds the canonical hash, and re-signing an
/// unchanged file converges on the same hash.
#[test]
fn directive_signing_is_idempotent() {
    let (dir, kernel) = kernel_with_project();
    let directives = dir.path().join("project/.ai/directives");
    std::fs::write(
        directives.join("greet.md"),
        r#"# Greet

```xml
<directive name="greet" version="1.0.0">
  <metadata>
    <description>Say hello</description>
    <category>demo</category>
    <model tier="fast"/>
  </metadata>
  <process>
    <step name="hello"><command>echo hello</command></step>
  </process>
</directive>
```
"#,
    )
    .unwrap();

    let first = kernel.sign(ArtifactKind::Directive, "greet").unwrap();

    // The embedded hash equals the directly computed canonical hash.
    let signed = std::fs::read_to_string(&first.path).unwrap();
    let block = kiwi_integrity::extract_signature(&signed).unwrap();
    let parsed = kiwi_artifacts::parse_directive(&signed).unwrap();
    let expected = compute_directive_integrity(
        "greet",
        "1.0.0",
        &parsed.xml_body,
        &parsed.directive.integrity_metadata(),
    )
    .unwrap();
    assert_eq!(block.hash, expected);
    assert_eq!(block.item_id, "greet");

    let second = kernel.sign(ArtifactKind::Directive, "greet").unwrap();
    assert_eq!(first.integrity, second.integrity);

    // Exactly one signature line after re-signing.
    let resigned = std::fs::read_to_string(&second.path).unwrap();
    assert_eq!(resigned.matches("kiwi-mcp:validated").count(), 1);
}

/// Knowledge signing hashes the body with validation keys excluded, so
/// the hash survives a round of stamping.
#[test]
fn knowledge_signing_converges() {
    let (dir, kernel) = kernel_with_project();
    let knowledge = dir.path().join("project/.ai/knowledge");
    std::fs::create_dir_all(&knowledge).unwrap();
    std::fs::write(
        knowledge.join("20260101-tips.md"),
        "---\nzettel_id: 20260101-tips\ntitle: Tips\nversion: 1.0.0\nentry_type: learning\n---\nBody text.\n",
    )
    .unwrap();

    let first = kernel.sign(ArtifactKind::Knowledge, "20260101-tips").unwrap();
    let second = kernel.sign(ArtifactKind::Knowledge, "20260101-tips").unwrap();
    assert_eq!(first.integrity, second.integrity);
}

/// Tools without a declared version never sign.
#[test]
fn unversioned_tool_rejected_by_signer() {
    let (dir, kernel) = kernel_with_project();
    let tools = dir.path().join("project/.ai/tools");
    std::fs::write(
        tools.join("bare.py"),
        "TOOL_METADATA = {'name': 'bare', 'tool_type': 'primitive'}\n",
    )
    .unwrap();

    let err = kernel.sign(ArtifactKind::Tool, "bare").unwrap_err();
    assert!(err.to_string().contains("Refusing to sign"));
}
