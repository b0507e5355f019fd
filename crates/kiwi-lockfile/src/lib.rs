//! # Lockfile Store
//!
//! Lockfiles capture a fully resolved executor chain with pinned versions
//! and integrity hashes, enabling reproducible re-resolution across
//! environments and sessions.
//!
//! ## Storage Layout
//!
//! ```text
//! {scope_root}/lockfiles/
//!   {category}/
//!     {tool_id}@{version}.lock.json
//!     {tool_id}@{version}.{chain12}.lock.json    multiple chains per version
//!   .index.json
//! ```
//!
//! Project and user scopes hold independent trees; `load` consults the
//! project scope first and a user lockfile never overrides a present
//! project one.
//!
//! ## Write Discipline
//!
//! Lockfile and index writes go through a temp file plus rename, so a
//! reader never observes a torn file. The in-memory index cache is
//! refreshed on every save and invalidated as a whole, never patched.
//!
//! The wire format is versioned (`lockfile_version = 1`); any other
//! version is a hard error, not a migration opportunity.

mod model;
mod store;

pub use model::{
    freeze, validate_against_chain, ChainCheck, LockEntry, Lockfile, LockfileError,
    RegistryProvenance, RootPin, LOCKFILE_VERSION,
};
pub use store::{LockfileMetadata, LockfileStore};

/// Result type for lockfile operations.
pub type Result<T> = std::result::Result<T, LockfileError>;
