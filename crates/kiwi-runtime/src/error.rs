//! Error types for the runtime kernel.

use thiserror::Error;

/// Errors raised by token, keychain, and proxy plumbing.
///
/// Permission denials and stuck signals are not errors: they are ordinary
/// outcomes carried in [`crate::CheckResult`] and [`crate::ToolResult`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Keychain files could not be created or read.
    #[error("Keychain error: {0}")]
    Keychain(String),

    /// Token serialization failed.
    #[error("Token encoding error: {0}")]
    TokenEncoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
