//! Unified path resolution service.

use kiwi_artifacts::{ArtifactKind, Scope};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Which tiers a lookup may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// Project first, then user.
    Local,
    /// Project tier only.
    Project,
    /// User tier only.
    User,
}

/// Result of a path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved path, or `None` when the id is absent in every searched
    /// tier (negative results are cached too).
    pub path: Option<PathBuf>,
    /// Tier the hit came from.
    pub scope: Option<Scope>,
    /// Whether this answer was served from cache.
    pub cached: bool,
}

/// Structural report from [`PathService::validate_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub scope: Option<Scope>,
    /// Normalized slash-separated category, empty when the file sits in
    /// the base directory.
    pub category: String,
}

type CacheKey = (ArtifactKind, String, SearchScope);

/// Three-tier path resolver with positive and negative caching.
///
/// # Example
///
/// ```rust,no_run
/// use kiwi_paths::{PathService, SearchScope};
/// use kiwi_artifacts::ArtifactKind;
///
/// let service = PathService::new(Some("/work/project".into()));
/// let res = service.resolve(ArtifactKind::Tool, "hello_node", SearchScope::Local);
/// if let Some(path) = res.path {
///     println!("found at {}", path.display());
/// }
/// ```
pub struct PathService {
    project_root: Option<PathBuf>,
    user_space: PathBuf,
    cache: RwLock<HashMap<CacheKey, Resolution>>,
    tool_extensions: RwLock<Vec<String>>,
}

impl PathService {
    /// Creates a service rooted at `project_root` (the directory holding
    /// `.ai/`). The user tier root comes from `$USER_SPACE`, falling back
    /// to `~/.ai`.
    pub fn new(project_root: Option<PathBuf>) -> Self {
        Self::with_user_space(project_root, default_user_space())
    }

    /// Creates a service with an explicit user tier root. Used by tests
    /// and by callers that already resolved the environment.
    pub fn with_user_space(project_root: Option<PathBuf>, user_space: PathBuf) -> Self {
        debug!(project = ?project_root, user = %user_space.display(), "path service initialized");
        Self {
            project_root,
            user_space,
            cache: RwLock::new(HashMap::new()),
            tool_extensions: RwLock::new(vec![".py".to_string()]),
        }
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn user_space(&self) -> &Path {
        &self.user_space
    }

    /// Registers an additional tool file extension contributed by an
    /// extractor (e.g. `.sh`, `.js`). `.py` is always present.
    pub fn register_tool_extension(&self, ext: &str) {
        let normalized = if ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{ext}")
        };
        let mut extensions = self.tool_extensions.write();
        if !extensions.contains(&normalized) {
            extensions.push(normalized);
        }
    }

    /// File extensions tried for a kind, in order.
    pub fn extensions(&self, kind: ArtifactKind) -> Vec<String> {
        match kind {
            ArtifactKind::Directive | ArtifactKind::Knowledge => vec![".md".to_string()],
            ArtifactKind::Tool => self.tool_extensions.read().clone(),
        }
    }

    /// Base directory for a kind in a tier, if the tier is available.
    pub fn base_dir(&self, kind: ArtifactKind, scope: Scope) -> Option<PathBuf> {
        match scope {
            Scope::Project => self
                .project_root
                .as_ref()
                .map(|root| root.join(".ai").join(kind.dir_name())),
            Scope::User => Some(self.user_space.join(kind.dir_name())),
        }
    }

    /// Resolves an id to a path. Tiers are searched project before user;
    /// the first hit wins and user files never shadow project files.
    pub fn resolve(&self, kind: ArtifactKind, id: &str, scope: SearchScope) -> Resolution {
        let key = (kind, id.to_string(), scope);

        if let Some(hit) = self.cache.read().get(&key) {
            return Resolution {
                cached: true,
                ..hit.clone()
            };
        }

        let extensions = self.extensions(kind);
        let mut resolution = Resolution {
            path: None,
            scope: None,
            cached: false,
        };

        for tier in tiers_for(scope) {
            let Some(base) = self.base_dir(kind, *tier) else {
                continue;
            };
            if !base.is_dir() {
                continue;
            }
            if let Some(found) = find_in_base(&base, id, &extensions) {
                debug!(kind = %kind, id, tier = %tier, path = %found.display(), "resolved");
                resolution = Resolution {
                    path: Some(found),
                    scope: Some(*tier),
                    cached: false,
                };
                break;
            }
        }

        self.cache.write().insert(key, resolution.clone());
        resolution
    }

    /// Drops cached results. Passing `None, None` clears everything;
    /// either filter narrows the sweep to one kind or one id.
    pub fn invalidate(&self, kind: Option<ArtifactKind>, id: Option<&str>) {
        let mut cache = self.cache.write();
        if kind.is_none() && id.is_none() {
            cache.clear();
            debug!("path cache fully cleared");
            return;
        }
        cache.retain(|(k, i, _), _| {
            !(kind.map_or(true, |want| *k == want) && id.map_or(true, |want| i == want))
        });
    }

    /// Extracts the category path (directories between the tier base and
    /// the file), slash-joined. Empty when the file sits in the base.
    pub fn extract_category(&self, path: &Path, kind: ArtifactKind) -> String {
        for tier in [Scope::Project, Scope::User] {
            let Some(base) = self.base_dir(kind, tier) else {
                continue;
            };
            if let Ok(relative) = path.strip_prefix(&base) {
                let parts: Vec<&str> = relative
                    .parent()
                    .map(|p| {
                        p.iter()
                            .filter_map(|component| component.to_str())
                            .collect()
                    })
                    .unwrap_or_default();
                return parts.join("/");
            }
        }
        String::new()
    }

    /// Validates that a path sits under an expected tier base with a
    /// recognized extension, reporting every structural issue found.
    pub fn validate_path(&self, path: &Path, kind: ArtifactKind) -> PathReport {
        let mut issues = Vec::new();

        let extensions = self.extensions(kind);
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        if !extensions.contains(&ext) {
            issues.push(format!(
                "Invalid extension '{}'. Expected one of: {}",
                ext,
                extensions.join(", ")
            ));
        }

        let mut scope = None;
        for tier in [Scope::Project, Scope::User] {
            if let Some(base) = self.base_dir(kind, tier) {
                if path.starts_with(&base) {
                    scope = Some(tier);
                    break;
                }
            }
        }
        if scope.is_none() {
            issues.push(format!(
                "Path not under a {} base directory for any tier",
                kind.dir_name()
            ));
        }

        let category = if scope.is_some() {
            self.extract_category(path, kind)
        } else {
            String::new()
        };

        PathReport {
            valid: issues.is_empty(),
            issues,
            scope,
            category,
        }
    }
}

impl std::fmt::Debug for PathService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathService")
            .field("project_root", &self.project_root)
            .field("user_space", &self.user_space)
            .field("cached_entries", &self.cache.read().len())
            .finish()
    }
}

/// `$USER_SPACE` override, else `~/.ai`.
fn default_user_space() -> PathBuf {
    if let Ok(space) = std::env::var("USER_SPACE") {
        if !space.is_empty() {
            return PathBuf::from(space);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ai")
}

fn tiers_for(scope: SearchScope) -> &'static [Scope] {
    match scope {
        SearchScope::Local => &[Scope::Project, Scope::User],
        SearchScope::Project => &[Scope::Project],
        SearchScope::User => &[Scope::User],
    }
}

fn find_in_base(base: &Path, id: &str, extensions: &[String]) -> Option<PathBuf> {
    for ext in extensions {
        let filename = format!("{id}{ext}");

        // 1. Direct hit in the base directory.
        let direct = base.join(&filename);
        if direct.is_file() {
            return Some(direct);
        }

        // 2. One category level down.
        if let Ok(entries) = std::fs::read_dir(base) {
            for entry in entries.flatten() {
                let candidate = entry.path().join(&filename);
                if entry.path().is_dir() && candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        // 3. Full recursive walk.
        for entry in WalkDir::new(base).min_depth(2).into_iter().flatten() {
            if entry.file_type().is_file() && entry.file_name().to_string_lossy() == filename {
                return Some(entry.into_path());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Project and user trees with one tool in each placement depth.
    fn fixture() -> (TempDir, PathService) {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let user = dir.path().join("userspace");

        let tools = project.join(".ai/tools");
        fs::create_dir_all(tools.join("runtimes/js")).unwrap();
        fs::write(tools.join("direct.py"), "name = \"direct\"\n").unwrap();
        fs::write(tools.join("runtimes/shallow.py"), "name = \"shallow\"\n").unwrap();
        fs::write(tools.join("runtimes/js/deep.py"), "name = \"deep\"\n").unwrap();

        fs::create_dir_all(user.join("tools")).unwrap();
        fs::write(user.join("tools/direct.py"), "name = \"user_copy\"\n").unwrap();
        fs::write(user.join("tools/user_only.py"), "name = \"user_only\"\n").unwrap();

        let service = PathService::with_user_space(Some(project), user);
        (dir, service)
    }

    #[test]
    fn test_direct_resolution() {
        let (_dir, service) = fixture();
        let res = service.resolve(ArtifactKind::Tool, "direct", SearchScope::Local);
        assert!(res.path.is_some());
        assert_eq!(res.scope, Some(Scope::Project));
        assert!(!res.cached);
    }

    #[test]
    fn test_one_level_category() {
        let (_dir, service) = fixture();
        let res = service.resolve(ArtifactKind::Tool, "shallow", SearchScope::Local);
        let path = res.path.unwrap();
        assert!(path.ends_with("runtimes/shallow.py"));
    }

    #[test]
    fn test_recursive_resolution() {
        let (_dir, service) = fixture();
        let res = service.resolve(ArtifactKind::Tool, "deep", SearchScope::Local);
        assert!(res.path.unwrap().ends_with("runtimes/js/deep.py"));
    }

    #[test]
    fn test_project_shadows_user() {
        let (_dir, service) = fixture();
        let res = service.resolve(ArtifactKind::Tool, "direct", SearchScope::Local);
        assert_eq!(res.scope, Some(Scope::Project));
    }

    #[test]
    fn test_user_tier_fallback() {
        let (_dir, service) = fixture();
        let res = service.resolve(ArtifactKind::Tool, "user_only", SearchScope::Local);
        assert_eq!(res.scope, Some(Scope::User));
    }

    #[test]
    fn test_negative_result_cached() {
        let (_dir, service) = fixture();
        let first = service.resolve(ArtifactKind::Tool, "ghost", SearchScope::Local);
        assert!(first.path.is_none());
        assert!(!first.cached);

        let second = service.resolve(ArtifactKind::Tool, "ghost", SearchScope::Local);
        assert!(second.path.is_none());
        assert!(second.cached);
    }

    #[test]
    fn test_invalidate_by_id() {
        let (_dir, service) = fixture();
        service.resolve(ArtifactKind::Tool, "direct", SearchScope::Local);
        service.resolve(ArtifactKind::Tool, "deep", SearchScope::Local);

        service.invalidate(None, Some("direct"));

        assert!(!service
            .resolve(ArtifactKind::Tool, "direct", SearchScope::Local)
            .cached);
        assert!(service
            .resolve(ArtifactKind::Tool, "deep", SearchScope::Local)
            .cached);
    }

    #[test]
    fn test_cache_serves_after_deletion_until_invalidated() {
        let (_dir, service) = fixture();
        let first = service.resolve(ArtifactKind::Tool, "direct", SearchScope::Local);
        let path = first.path.clone().unwrap();
        fs::remove_file(&path).unwrap();

        // Stale until invalidated, by contract.
        assert!(service
            .resolve(ArtifactKind::Tool, "direct", SearchScope::Local)
            .cached);

        service.invalidate(Some(ArtifactKind::Tool), None);
        let fresh = service.resolve(ArtifactKind::Tool, "direct", SearchScope::Local);
        assert_ne!(fresh.path, Some(path));
    }

    #[test]
    fn test_extract_category() {
        let (_dir, service) = fixture();
        let deep = service
            .resolve(ArtifactKind::Tool, "deep", SearchScope::Local)
            .path
            .unwrap();
        assert_eq!(service.extract_category(&deep, ArtifactKind::Tool), "runtimes/js");

        let direct = service
            .resolve(ArtifactKind::Tool, "direct", SearchScope::Local)
            .path
            .unwrap();
        assert_eq!(service.extract_category(&direct, ArtifactKind::Tool), "");
    }

    #[test]
    fn test_validate_path() {
        let (_dir, service) = fixture();
        let deep = service
            .resolve(ArtifactKind::Tool, "deep", SearchScope::Local)
            .path
            .unwrap();

        let report = service.validate_path(&deep, ArtifactKind::Tool);
        assert!(report.valid);
        assert_eq!(report.scope, Some(Scope::Project));
        assert_eq!(report.category, "runtimes/js");

        let stray = PathBuf::from("/tmp/nowhere/thing.txt");
        let report = service.validate_path(&stray, ArtifactKind::Tool);
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_registered_extension_searched() {
        let (dir, service) = fixture();
        let tools = dir.path().join("project/.ai/tools");
        fs::write(tools.join("script.sh"), "name=\"script\"\n").unwrap();

        assert!(service
            .resolve(ArtifactKind::Tool, "script", SearchScope::Local)
            .path
            .is_none());

        service.register_tool_extension("sh");
        service.invalidate(None, None);
        assert!(service
            .resolve(ArtifactKind::Tool, "script", SearchScope::Local)
            .path
            .is_some());
    }
}
