//! Classification seam
//!
//! The sensor treats the malware model as an opaque collaborator behind
//! [`Classifier`]. Implementations may block (local inference, remote
//! endpoint); callers invoke them on worker or janitor threads, never on
//! the receive path.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::flow::FlowKey;
use crate::models::{FeatureRecord, Verdict, VerdictLabel};

/// Scoring hook for closed flow windows
pub trait Classifier: Send + Sync {
    fn classify(&self, tenant: &str, key: &FlowKey, features: &FeatureRecord) -> Result<Verdict>;
}

/// Byte-rate threshold classifier.
///
/// Stand-in scoring hook: normalizes the window's bytes/sec against a
/// threshold and flags flows above half of it. A real model slots in
/// behind [`Classifier`] without touching the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateClassifier {
    /// Bytes/sec that maps to score 1.0
    pub bps_threshold: f64,
}

impl Default for RateClassifier {
    fn default() -> Self {
        Self {
            bps_threshold: 1_000_000.0,
        }
    }
}

impl RateClassifier {
    pub fn new(bps_threshold: f64) -> Self {
        Self { bps_threshold }
    }
}

impl Classifier for RateClassifier {
    fn classify(&self, _tenant: &str, _key: &FlowKey, features: &FeatureRecord) -> Result<Verdict> {
        let score = (features.bps / self.bps_threshold).min(1.0);
        let label = if score > 0.5 {
            VerdictLabel::Malicious
        } else {
            VerdictLabel::Benign
        };
        Ok(Verdict { score, label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(bps: f64) -> FeatureRecord {
        FeatureRecord {
            pkts: 10,
            bytes: (bps * 2.0) as u64,
            duration: 2.0,
            pps: 5.0,
            bps,
        }
    }

    #[test]
    fn test_rate_classifier_benign_below_threshold() {
        let clf = RateClassifier::default();
        let verdict = clf
            .classify("TENANT#1", &FlowKey::non_ip("TENANT#1"), &features(100_000.0))
            .unwrap();
        assert_eq!(verdict.label, VerdictLabel::Benign);
        assert!((verdict.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rate_classifier_malicious_above_half() {
        let clf = RateClassifier::default();
        let verdict = clf
            .classify("TENANT#1", &FlowKey::non_ip("TENANT#1"), &features(600_000.0))
            .unwrap();
        assert!(verdict.is_malicious());
    }

    #[test]
    fn test_rate_classifier_score_saturates() {
        let clf = RateClassifier::default();
        let verdict = clf
            .classify("TENANT#1", &FlowKey::non_ip("TENANT#1"), &features(5e9))
            .unwrap();
        assert_eq!(verdict.score, 1.0);
    }
}
