//! # Runtime Security Kernel
//!
//! Enforcement layer for every tool call a session makes. Each execution
//! thread carries a signed, attenuable capability token; a central proxy
//! intercepts every call to check permissions, detect stuck-loop
//! patterns, and audit-log outcomes.
//!
//! ## Threat Model
//!
//! | Threat | Component | Defense |
//! |--------|-----------|---------|
//! | Privilege escalation | Capability tokens | Attenuation by set intersection |
//! | Token forgery / replay | Token signer | Ed25519 over canonical JSON, audience + expiry |
//! | Unauthorized file access | Permission checker | Glob allow-lists per direction |
//! | Infinite agent loops | Loop detector | Sliding-window pattern matching |
//! | Untraceable actions | Audit log | Append-only JSONL with secret redaction |
//!
//! ## Call Path
//!
//! ```text
//! call_tool ─► loop check ─► permission check ─► load metadata
//!                  │               │                  │
//!                  ▼               ▼                  ▼
//!              stuck? fail     denied? fail       execute ─► audit
//! ```
//!
//! The proxy never executes a call the loop detector flags: detection is
//! admission control, not postmortem.

mod audit;
mod capability;
mod error;
mod executor;
mod loop_detector;
mod permissions;
mod proxy;

pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use capability::{
    attenuate_token, mint_token, permissions_to_caps, CapabilityToken, TokenSigner, TOKEN_AUDIENCE,
};
pub use error::RuntimeError;
pub use executor::{
    effective_timeout_secs, ExecutionOutcome, ToolExecutor, DEFAULT_EMBEDDING_TIMEOUT_SECS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_SUBPROCESS_TIMEOUT_SECS,
};
pub use loop_detector::{LoopDetector, PatternType, StuckSignal};
pub use permissions::{CheckResult, PermissionChecker, PermissionContext};
pub use proxy::{ToolProxy, ToolResult};

// Cancellation handle accepted by suspension-capable operations.
pub use tokio_util::sync::CancellationToken;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
