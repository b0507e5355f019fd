//! Per-link integrity verification with positive and negative caches.

use crate::resolver::ChainLink;
use kiwi_integrity::{compute_tool_integrity, short_hash};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, warn};

/// Outcome of verifying a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub success: bool,
    /// Links that passed, including cache hits.
    pub verified_count: usize,
    /// Links answered from the positive cache without recomputation.
    pub cached_count: usize,
    pub duration_ms: u64,
    /// Index of the failing link, when verification aborted.
    pub failed_at: Option<usize>,
    pub failed_tool_id: Option<String>,
    pub error: Option<String>,
}

impl VerificationReport {
    fn failure(
        error: String,
        failed_at: usize,
        failed_tool_id: String,
        verified: usize,
        cached: usize,
        started: Instant,
    ) -> Self {
        Self {
            success: false,
            verified_count: verified,
            cached_count: cached,
            duration_ms: started.elapsed().as_millis() as u64,
            failed_at: Some(failed_at),
            failed_tool_id: Some(failed_tool_id),
            error: Some(error),
        }
    }
}

/// Verifies that every link's stored hash matches its recomputed canonical
/// hash.
///
/// Verification is strictly sequential and short-circuits at the first
/// failure. Two caches accelerate repeat verification: hashes that checked
/// out skip recomputation, and hashes that failed once fail fast without
/// recomputation. Entries leave the caches only through
/// [`IntegrityVerifier::invalidate`] or [`IntegrityVerifier::clear_cache`].
#[derive(Debug, Default)]
pub struct IntegrityVerifier {
    verified: Mutex<HashMap<String, Instant>>,
    failed: Mutex<HashSet<String>>,
}

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies every link of `chain` in order.
    pub fn verify_chain(&self, chain: &[ChainLink]) -> VerificationReport {
        let started = Instant::now();
        let mut verified_count = 0usize;
        let mut cached_count = 0usize;

        for (i, link) in chain.iter().enumerate() {
            let stored = &link.content_hash;

            // A missing stored hash cannot be verified; this is distinct
            // from the lockfile store's empty-tolerates comparison.
            if stored.is_empty() {
                return VerificationReport::failure(
                    format!(
                        "No integrity hash found for {}@{}",
                        link.tool_id, link.version
                    ),
                    i,
                    link.tool_id.clone(),
                    verified_count,
                    cached_count,
                    started,
                );
            }

            if self.failed.lock().contains(stored) {
                warn!(tool_id = %link.tool_id, "hash in negative cache, failing fast");
                return VerificationReport::failure(
                    format!("Previously failed integrity for {}", link.tool_id),
                    i,
                    link.tool_id.clone(),
                    verified_count,
                    cached_count,
                    started,
                );
            }

            if self.verified.lock().contains_key(stored) {
                cached_count += 1;
                verified_count += 1;
                continue;
            }

            let computed = match compute_tool_integrity(
                &link.tool_id,
                &link.version,
                &link.manifest,
                &link.files,
            ) {
                Ok(hash) => hash,
                Err(e) => {
                    return VerificationReport::failure(
                        format!("Failed to compute integrity for {}: {e}", link.tool_id),
                        i,
                        link.tool_id.clone(),
                        verified_count,
                        cached_count,
                        started,
                    );
                }
            };

            if computed != *stored {
                self.failed.lock().insert(stored.clone());
                return VerificationReport::failure(
                    format!(
                        "Integrity mismatch for {}@{}: computed={}, stored={}",
                        link.tool_id,
                        link.version,
                        short_hash(&computed),
                        short_hash(stored)
                    ),
                    i,
                    link.tool_id.clone(),
                    verified_count,
                    cached_count,
                    started,
                );
            }

            self.verified.lock().insert(stored.clone(), Instant::now());
            verified_count += 1;
            debug!(tool_id = %link.tool_id, "link verified");
        }

        VerificationReport {
            success: true,
            verified_count,
            cached_count,
            duration_ms: started.elapsed().as_millis() as u64,
            failed_at: None,
            failed_tool_id: None,
            error: None,
        }
    }

    /// Verifies a single link.
    pub fn verify_single(&self, link: &ChainLink) -> VerificationReport {
        self.verify_chain(std::slice::from_ref(link))
    }

    /// Whether a hash sits in the positive cache.
    pub fn is_verified(&self, content_hash: &str) -> bool {
        self.verified.lock().contains_key(content_hash)
    }

    /// Removes one hash from both caches.
    pub fn invalidate(&self, content_hash: &str) {
        self.verified.lock().remove(content_hash);
        self.failed.lock().remove(content_hash);
    }

    /// Drops both caches entirely.
    pub fn clear_cache(&self) {
        self.verified.lock().clear();
        self.failed.lock().clear();
    }

    /// `(positive, negative)` cache sizes.
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.verified.lock().len(), self.failed.lock().len())
    }
}
