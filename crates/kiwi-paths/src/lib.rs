//! # Path Service
//!
//! Single source of truth for resolving `(kind, id, scope)` to a
//! filesystem path across the project → user tier hierarchy.
//!
//! ## Search Order
//!
//! Within each tier base directory, lookups proceed cheapest-first and
//! return the first hit:
//!
//! 1. Direct: `{base}/{id}{ext}`, constant time.
//! 2. One-level category: `{base}/*/{id}{ext}`, one directory listing.
//! 3. Recursive: `{base}/**/{id}{ext}`, full walk.
//!
//! Results, including misses, are cached until an explicit invalidate.
//! The cache is read-mostly: lookups take a read lock, only insertion
//! takes the write lock.

mod service;

pub use service::{PathReport, PathService, Resolution, SearchScope};
