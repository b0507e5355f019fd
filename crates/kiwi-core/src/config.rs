//! Configuration types for the kiwi kernel.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the kernel facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Path resolution settings.
    pub paths: PathsSettings,

    /// Lockfile settings.
    pub lockfile: LockfileSettings,

    /// Runtime security settings.
    pub runtime: RuntimeSettings,

    /// Local search settings.
    pub search: SearchSettings,
}

/// Where the two local tiers live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsSettings {
    /// Project root (the directory holding `.ai/`). `None` disables the
    /// project tier.
    pub project_root: Option<PathBuf>,

    /// User tier root override. `None` resolves `$USER_SPACE`, falling
    /// back to `~/.ai`.
    pub user_space: Option<PathBuf>,
}

/// How lockfile mismatches are handled during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockfileMode {
    /// Mismatch is surfaced as a warning and verification proceeds.
    Warn,
    /// Mismatch fails verification.
    Strict,
}

/// Lockfile settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockfileSettings {
    pub mode: LockfileMode,

    /// Age threshold for [`crate::Kernel::prune_lockfiles`].
    pub max_age_days: i64,
}

impl Default for LockfileSettings {
    fn default() -> Self {
        Self {
            mode: LockfileMode::Warn,
            max_age_days: 90,
        }
    }
}

/// Runtime security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Loop detector sliding window length.
    pub window_size: usize,

    /// Identical-call threshold for the exact-repeat pattern.
    pub repeat_threshold: usize,

    /// Capability token lifetime.
    pub token_exp_hours: i64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            repeat_threshold: 3,
            token_exp_hours: 1,
        }
    }
}

/// Local search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    pub limit: usize,

    /// Keyword hits below this score are discarded.
    pub min_score: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 20,
            min_score: 0.1,
        }
    }
}
