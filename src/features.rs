//! Feature extraction
//!
//! Reduces a closed flow window to the scalar record the classifier
//! consumes. Pure and deterministic; no I/O.

use crate::models::{FeatureRecord, Observation};

/// Floor for window duration so single-packet windows do not divide by zero
const MIN_DURATION: f64 = 1e-6;

/// Reduce a closed window to its scalar features.
///
/// Returns `None` for an empty window; an idle sweep can return a key
/// whose window was already flushed and never re-accumulated.
pub fn extract(obs: &[Observation]) -> Option<FeatureRecord> {
    let first = obs.first()?;
    let last = obs.last()?;

    let pkts = obs.len() as u64;
    let bytes: u64 = obs.iter().map(|o| o.size as u64).sum();
    let duration = (last.ts - first.ts).max(MIN_DURATION);

    Some(FeatureRecord {
        pkts,
        bytes,
        duration,
        pps: pkts as f64 / duration,
        bps: bytes as f64 / duration,
    })
}
