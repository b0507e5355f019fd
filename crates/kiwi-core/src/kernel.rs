//! The kernel facade.

use crate::config::{KernelConfig, LockfileMode};
use crate::error::KernelError;
use kiwi_artifacts::{
    parse_directive, parse_knowledge, parse_strict_version, parse_tool, ArtifactKind, Scope,
    UNSIGNED_VERSION,
};
use kiwi_chain::{
    ChainLink, ChainResolver, ChainValidationReport, ChainValidator, IntegrityVerifier,
    VerificationReport,
};
use kiwi_integrity::{
    compute_directive_integrity, compute_knowledge_integrity, compute_tool_integrity,
    embed_signature, CommentStyle, IntegrityError,
};
use kiwi_lockfile::{ChainCheck, Lockfile, LockfileStore};
use kiwi_paths::{PathService, SearchScope};
use kiwi_runtime::{
    mint_token, permissions_to_caps, AuditLogger, CapabilityToken, PermissionChecker,
    PermissionContext, TokenSigner, ToolExecutor, ToolProxy, ToolResult,
};
use kiwi_search::{KeywordHit, KeywordSearchEngine};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of signing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignReceipt {
    pub item_id: String,
    pub integrity: String,
    pub path: PathBuf,
}

/// Outcome of a full chain verification.
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub chain: Vec<ChainLink>,
    pub verification: VerificationReport,
    pub validation: ChainValidationReport,
    /// Lockfile comparison, when a lockfile existed for the root.
    pub lockfile: Option<ChainCheck>,
}

/// The kernel: one handle over integrity, chains, lockfiles, runtime
/// security, and local search.
pub struct Kernel {
    config: KernelConfig,
    paths: Arc<PathService>,
    verifier: IntegrityVerifier,
    chain_validator: ChainValidator,
    lockfiles: LockfileStore,
    signer: TokenSigner,
    keyword: Mutex<KeywordSearchEngine>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let paths = match &config.paths.user_space {
            Some(user_space) => Arc::new(PathService::with_user_space(
                config.paths.project_root.clone(),
                user_space.clone(),
            )),
            None => Arc::new(PathService::new(config.paths.project_root.clone())),
        };

        let lockfiles = LockfileStore::new(
            config.paths.project_root.clone(),
            paths.user_space().to_path_buf(),
        );
        let signer = TokenSigner::new(paths.user_space().join("keys"));

        Self {
            config,
            paths,
            verifier: IntegrityVerifier::new(),
            chain_validator: ChainValidator::new(),
            lockfiles,
            signer,
            keyword: Mutex::new(KeywordSearchEngine::new()),
        }
    }

    pub fn paths(&self) -> &Arc<PathService> {
        &self.paths
    }

    pub fn lockfiles(&self) -> &LockfileStore {
        &self.lockfiles
    }

    /// Validates and signs an artifact in place: computes the canonical
    /// integrity hash and embeds the signature line. Re-signing an
    /// unchanged artifact produces the same hash.
    pub fn sign(&self, kind: ArtifactKind, id: &str) -> Result<SignReceipt, KernelError> {
        let resolution = self.paths.resolve(kind, id, SearchScope::Local);
        let Some(path) = resolution.path else {
            return Err(KernelError::NotFound(format!("{kind} '{id}'")));
        };
        let content = std::fs::read_to_string(&path)?;

        let (hash, style) = match kind {
            ArtifactKind::Directive => {
                let parsed = parse_directive(&content)?;
                let directive = &parsed.directive;
                let hash = compute_directive_integrity(
                    &directive.name,
                    &directive.version,
                    &parsed.xml_body,
                    &directive.integrity_metadata(),
                )?;
                (hash, CommentStyle::Html)
            }
            ArtifactKind::Tool => {
                let extension = extension_of(&path);
                let parsed = parse_tool(&content, &extension)?;
                let metadata = &parsed.metadata;
                if metadata.version == UNSIGNED_VERSION {
                    return Err(KernelError::Integrity(IntegrityError::UnsignedVersion(
                        metadata.version.clone(),
                    )));
                }
                parse_strict_version(&metadata.version)?;
                let hash = compute_tool_integrity(
                    id,
                    &metadata.version,
                    &metadata.manifest(),
                    &[],
                )?;
                (hash, CommentStyle::for_extension(&extension))
            }
            ArtifactKind::Knowledge => {
                let parsed = parse_knowledge(&content, true)?;
                let entry = &parsed.entry;
                if entry.version.is_empty() || entry.version == UNSIGNED_VERSION {
                    return Err(KernelError::Integrity(IntegrityError::UnsignedVersion(
                        entry.version.clone(),
                    )));
                }
                parse_strict_version(&entry.version)?;
                let zettel_id = if entry.zettel_id.is_empty() {
                    id
                } else {
                    &entry.zettel_id
                };
                let hash = compute_knowledge_integrity(
                    zettel_id,
                    &entry.version,
                    &parsed.body,
                    &parsed.metadata,
                )?;
                (hash, CommentStyle::Html)
            }
        };

        let signed = embed_signature(&content, style, &hash, id);
        std::fs::write(&path, signed)?;
        self.paths.invalidate(Some(kind), Some(id));
        info!(kind = %kind, id, hash = %kiwi_integrity::short_hash(&hash), "signed");

        Ok(SignReceipt {
            item_id: id.to_string(),
            integrity: hash,
            path,
        })
    }

    /// Resolves the executor chain for a tool without verifying it.
    pub fn resolve_chain(&self, tool_id: &str) -> Result<Vec<ChainLink>, KernelError> {
        Ok(ChainResolver::new(self.paths.clone()).resolve_chain(tool_id)?)
    }

    /// Resolves and fully verifies a chain: link integrity, parent/child
    /// validation, and the stored lockfile per the configured mode.
    pub fn verify(&self, tool_id: &str) -> Result<ChainReport, KernelError> {
        let chain = self.resolve_chain(tool_id)?;

        let verification = self.verifier.verify_chain(&chain);
        if !verification.success {
            return Err(KernelError::Verification(
                verification
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown verification failure".to_string()),
            ));
        }

        let validation = self.chain_validator.validate_chain(&chain);
        if !validation.valid {
            return Err(KernelError::ChainValidation {
                issues: validation.issues.clone(),
            });
        }

        let root = &chain[0];
        let category = self.lockfile_category(root);
        let lockfile_check = match self.lockfiles.load(&root.tool_id, &root.version, &category)? {
            Some(lockfile) => {
                let check = self.lockfiles.validate_chain(&lockfile, &chain);
                if !check.valid {
                    match self.config.lockfile.mode {
                        LockfileMode::Strict => {
                            return Err(KernelError::LockfileMismatch {
                                issues: check.issues,
                            });
                        }
                        LockfileMode::Warn => {
                            warn!(tool_id, issues = ?check.issues, "lockfile mismatch");
                        }
                    }
                }
                Some(check)
            }
            None => None,
        };

        Ok(ChainReport {
            chain,
            verification,
            validation,
            lockfile: lockfile_check,
        })
    }

    /// Resolves, verifies, freezes, and saves a lockfile for a tool.
    /// Saves to the project scope when available, else the user scope.
    pub fn freeze(&self, tool_id: &str) -> Result<(Lockfile, PathBuf), KernelError> {
        let report = self.verify(tool_id)?;
        let root = &report.chain[0];

        let category = self.lockfile_category(root);
        let lockfile =
            self.lockfiles
                .freeze(&root.tool_id, &root.version, &report.chain, None)?;

        let scope = if self.paths.project_root().is_some() {
            Scope::Project
        } else {
            Scope::User
        };
        let path = self.lockfiles.save(&lockfile, &category, scope, None)?;
        Ok((lockfile, path))
    }

    /// Lockfile category for a chain root: the tool's own category, or
    /// the kind directory name for uncategorized tools (so their
    /// lockfiles land under `lockfiles/tools/`).
    fn lockfile_category(&self, root: &ChainLink) -> String {
        let category = self
            .paths
            .extract_category(&root.file_path, ArtifactKind::Tool);
        if category.is_empty() {
            ArtifactKind::Tool.dir_name().to_string()
        } else {
            category
        }
    }

    /// Prunes stale lockfiles using the configured age threshold.
    pub fn prune_lockfiles(&self) -> usize {
        self.lockfiles
            .prune_stale(self.config.lockfile.max_age_days, None)
    }

    /// Opens a runtime session for a directive: parses its permissions,
    /// mints and signs a capability token, and wires a tool proxy around
    /// the supplied executor.
    pub fn start_session(
        &self,
        directive_id: &str,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<KernelSession, KernelError> {
        let resolution = self
            .paths
            .resolve(ArtifactKind::Directive, directive_id, SearchScope::Local);
        let Some(path) = resolution.path else {
            return Err(KernelError::NotFound(format!("directive '{directive_id}'")));
        };
        let content = std::fs::read_to_string(&path)?;
        let parsed = parse_directive(&content)?;

        let thread_id = format!("thread-{}", uuid::Uuid::new_v4());
        let caps = permissions_to_caps(&parsed.directive.permissions);
        let token = mint_token(
            caps,
            directive_id,
            &thread_id,
            None,
            self.config.runtime.token_exp_hours,
        );
        let transport = self.signer.sign_token(&token)?;

        let context = PermissionContext::from_decls(&parsed.directive.permissions);
        let project_root = self
            .paths
            .project_root()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.user_space().to_path_buf());
        let proxy = ToolProxy::new(
            PermissionChecker::new(context),
            executor,
            AuditLogger::new(&project_root),
            self.paths.clone(),
        );

        Ok(KernelSession {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            token,
            transport,
            proxy,
        })
    }

    /// Verifies a capability token transport string.
    pub fn verify_token(&self, transport: &str) -> Option<CapabilityToken> {
        self.signer.verify_token(transport)
    }

    /// Indexes every local artifact into the keyword engine. Returns the
    /// number of documents indexed.
    pub fn index_local(&self) -> Result<usize, KernelError> {
        let mut engine = self.keyword.lock();
        engine.clear();
        let mut indexed = 0usize;

        for kind in [
            ArtifactKind::Directive,
            ArtifactKind::Tool,
            ArtifactKind::Knowledge,
        ] {
            let extensions = self.paths.extensions(kind);
            for scope in [Scope::Project, Scope::User] {
                let Some(base) = self.paths.base_dir(kind, scope) else {
                    continue;
                };
                if !base.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&base).into_iter().flatten() {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let path = entry.path();
                    let ext = extension_of(path);
                    if !extensions.contains(&ext) {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let Ok(content) = std::fs::read_to_string(path) else {
                        continue;
                    };
                    if let Some(fields) = index_fields(kind, stem, &content, &ext) {
                        engine.index_document(
                            stem,
                            kind.as_str(),
                            fields,
                            path.to_path_buf(),
                            serde_json::json!({"scope": scope.as_str()}),
                            None,
                        );
                        indexed += 1;
                    }
                }
            }
        }

        info!(indexed, "local keyword index rebuilt");
        Ok(indexed)
    }

    /// Keyword search over the local index (build it first with
    /// [`Kernel::index_local`]).
    pub fn search_local(&self, query: &str, kind: Option<ArtifactKind>) -> Vec<KeywordHit> {
        self.keyword.lock().search(
            query,
            kind.map(|k| k.as_str()),
            self.config.search.limit,
            self.config.search.min_score,
        )
    }

    /// Clears integrity and path caches.
    pub fn invalidate_caches(&self) {
        self.verifier.clear_cache();
        self.paths.invalidate(None, None);
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("project_root", &self.paths.project_root())
            .finish()
    }
}

/// A runtime session bound to one directive's permissions.
pub struct KernelSession {
    pub session_id: String,
    pub token: CapabilityToken,
    /// Signed transport form of the token.
    pub transport: String,
    proxy: ToolProxy,
}

impl KernelSession {
    /// Runs one tool call through the proxy under this session's token.
    pub async fn call_tool(&self, tool_id: &str, params: &Value) -> ToolResult {
        self.proxy
            .call_tool(&self.token, tool_id, params, &self.session_id)
            .await
    }

    /// Like [`Self::call_tool`], abandoning the call when `cancel` trips.
    pub async fn call_tool_with_cancel(
        &self,
        tool_id: &str,
        params: &Value,
        cancel: &kiwi_runtime::CancellationToken,
    ) -> ToolResult {
        self.proxy
            .call_tool_with_cancel(&self.token, tool_id, params, &self.session_id, cancel)
            .await
    }

    pub fn reset_loop_detector(&self) {
        self.proxy.reset_loop_detector();
    }

    pub fn audit_history(&self, limit: usize) -> Vec<kiwi_runtime::AuditEntry> {
        self.proxy.audit_history(Some(&self.session_id), limit)
    }
}

fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Extracts the searchable fields per kind. Unparseable files are
/// skipped rather than failing the whole index pass.
fn index_fields(
    kind: ArtifactKind,
    id: &str,
    content: &str,
    extension: &str,
) -> Option<HashMap<String, String>> {
    match kind {
        ArtifactKind::Directive => {
            let parsed = parse_directive(content).ok()?;
            Some(HashMap::from([
                ("name".to_string(), parsed.directive.name),
                ("description".to_string(), parsed.directive.description),
                ("category".to_string(), parsed.directive.category),
            ]))
        }
        ArtifactKind::Tool => {
            let parsed = parse_tool(content, extension).ok()?;
            let name = if parsed.metadata.name.is_empty() {
                id.to_string()
            } else {
                parsed.metadata.name
            };
            Some(HashMap::from([
                ("name".to_string(), name),
                ("description".to_string(), parsed.metadata.description),
                ("category".to_string(), parsed.metadata.category),
            ]))
        }
        ArtifactKind::Knowledge => {
            let parsed = parse_knowledge(content, false).ok()?;
            Some(HashMap::from([
                ("title".to_string(), parsed.entry.title),
                ("tags".to_string(), parsed.entry.tags.join(" ")),
                ("content".to_string(), parsed.body),
            ]))
        }
    }
}
