//! # Kiwi Kernel Core
//!
//! Unified facade over the content-addressed registry kernel: canonical
//! integrity and signing, executor chain resolution and verification,
//! lockfile storage, the runtime security layer, and local search.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │    Kernel    │  ← Unified Facade
//!                      └──────┬───────┘
//!                             │
//!      ┌──────────┬───────────┼───────────┬────────────┐
//!      ▼          ▼           ▼           ▼            ▼
//! ┌─────────┐ ┌────────┐ ┌─────────┐ ┌──────────┐ ┌─────────┐
//! │ Paths & │ │ Chain  │ │Lockfile │ │ Runtime  │ │ Search  │
//! │ Parsers │ │ Machine│ │  Store  │ │ Security │ │ Engines │
//! └─────────┘ └────────┘ └─────────┘ └──────────┘ └─────────┘
//! ```
//!
//! ## Data Flow
//!
//! - **Sign**: resolve file → parse metadata → canonical hash → embed
//!   signature → invalidate path cache.
//! - **Verify**: resolve chain → verify every link → validate
//!   parent/child shapes → confirm the lockfile per the configured mode.
//! - **Execute**: mint a capability token from directive permissions,
//!   then run every call through the tool proxy.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kiwi_core::{Kernel, KernelConfig};
//!
//! let mut config = KernelConfig::default();
//! config.paths.project_root = Some("/work/project".into());
//! let kernel = Kernel::new(config);
//!
//! let receipt = kernel.sign(kiwi_artifacts::ArtifactKind::Tool, "hello_node")?;
//! let report = kernel.verify("hello_node")?;
//! assert!(report.verification.success);
//! # Ok::<(), kiwi_core::KernelError>(())
//! ```

mod config;
mod error;
mod gateway;
mod kernel;

pub use config::{KernelConfig, LockfileMode, LockfileSettings, PathsSettings, RuntimeSettings,
    SearchSettings};
pub use error::KernelError;
pub use gateway::VectorGateway;
pub use kernel::{ChainReport, Kernel, KernelSession, SignReceipt};

// Re-export component types callers commonly touch through the facade.
pub use kiwi_artifacts::{ArtifactKind, Scope, ToolType};
pub use kiwi_chain::{ChainLink, ChainValidationReport, VerificationReport};
pub use kiwi_lockfile::{ChainCheck, Lockfile};
pub use kiwi_runtime::{CapabilityToken, StuckSignal, ToolExecutor, ToolResult};

/// Core result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
