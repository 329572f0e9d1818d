use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::FlowKey;

/// A single packet observation inside a flow window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Arrival time, seconds since the Unix epoch
    pub ts: f64,
    /// Inner frame length in bytes
    pub size: u32,
}

impl Observation {
    pub fn new(ts: f64, size: u32) -> Self {
        Self { ts, size }
    }
}

/// Scalar summary of one closed flow window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Packet count
    pub pkts: u64,
    /// Total bytes
    pub bytes: u64,
    /// Window span in seconds (floored, never zero)
    pub duration: f64,
    /// Packets per second
    pub pps: f64,
    /// Bytes per second
    pub bps: f64,
}

/// Classifier output label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Benign,
    Malicious,
}

impl std::fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictLabel::Benign => write!(f, "benign"),
            VerdictLabel::Malicious => write!(f, "malicious"),
        }
    }
}

impl std::str::FromStr for VerdictLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "benign" => Ok(VerdictLabel::Benign),
            "malicious" => Ok(VerdictLabel::Malicious),
            _ => Err(format!("Unknown verdict label: {}", s)),
        }
    }
}

/// Classifier output for one closed window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Score in [0, 1]
    pub score: f64,
    pub label: VerdictLabel,
}

impl Verdict {
    pub fn is_malicious(&self) -> bool {
        self.label == VerdictLabel::Malicious
    }
}

/// A classified window, as persisted to the detection store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: Option<i64>,
    pub flow: FlowKey,
    pub features: FeatureRecord,
    pub verdict: Verdict,
    /// Classification time, epoch milliseconds
    pub ts_ms: i64,
}

impl Detection {
    pub fn new(flow: FlowKey, features: FeatureRecord, verdict: Verdict, ts_ms: i64) -> Self {
        Self {
            id: None,
            flow,
            features,
            verdict,
            ts_ms,
        }
    }

    /// Classification time as a UTC timestamp
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.ts_ms).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_label_roundtrip() {
        assert_eq!("malicious".parse::<VerdictLabel>(), Ok(VerdictLabel::Malicious));
        assert_eq!("benign".parse::<VerdictLabel>(), Ok(VerdictLabel::Benign));
        assert_eq!(VerdictLabel::Malicious.to_string(), "malicious");
        assert!("suspect".parse::<VerdictLabel>().is_err());
    }

    #[test]
    fn test_detection_recorded_at() {
        let key = FlowKey::non_ip("TENANT#1");
        let features = FeatureRecord {
            pkts: 1,
            bytes: 60,
            duration: 1e-6,
            pps: 1e6,
            bps: 6e7,
        };
        let verdict = Verdict {
            score: 0.0,
            label: VerdictLabel::Benign,
        };
        let det = Detection::new(key, features, verdict, 1_700_000_000_000);
        assert_eq!(det.recorded_at().unwrap().timestamp_millis(), 1_700_000_000_000);
    }
}
