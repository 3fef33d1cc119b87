//! Classification results and threat levels
//!
//! The single `ThreatLevel::assess` derivation lives here so the threat
//! handler and the report generator can never disagree about a level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::flow::FlowId;

/// Number of ranked candidates carried per result.
pub const TOP_K: usize = 3;

/// Fixed-length numeric vector ready for model inference, with the flow
/// identifiers and optional ground-truth label carried alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedVector {
    /// Feature values in canonical order, length fixed to the model schema.
    pub features: Vec<f32>,
    pub id: FlowId,
    pub label: Option<String>,
}

/// One ranked candidate class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    pub class: String,
    /// Raw model probability in [0, 1], not renormalized.
    pub confidence: f32,
}

/// Classifier output for one flow: the top-3 candidate classes by confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: FlowId,
    /// Exactly [`TOP_K`] candidates, descending by confidence. Ties keep the
    /// model's class order (stable sort).
    pub top: Vec<RankedClass>,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

impl ClassificationResult {
    /// The most likely class.
    pub fn predicted(&self) -> &RankedClass {
        // Constructed with exactly TOP_K entries by the classifier.
        &self.top[0]
    }

    /// The runner-up class.
    pub fn runner_up(&self) -> &RankedClass {
        &self.top[1]
    }

    /// True if the ground-truth label matches the predicted class.
    pub fn is_correct(&self) -> Option<bool> {
        self.label
            .as_deref()
            .map(|l| l.eq_ignore_ascii_case(&self.predicted().class))
    }
}

/// Operator-facing threat level, derived from a result and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    /// Top-1 class is an attack.
    Red,
    /// Top-1 is benign but the runner-up is a sufficiently confident attack.
    Yellow,
    /// Clean.
    Green,
}

impl ThreatLevel {
    /// Derive the threat level for a result.
    ///
    /// Pure: the same (top-1, top-2, top-2 confidence, benign label,
    /// threshold) always yields the same level. This is the only derivation
    /// in the crate; both the threat handler and the reporter call it.
    pub fn assess(result: &ClassificationResult, benign_label: &str, suspicion_threshold: f32) -> Self {
        if !result.predicted().class.eq_ignore_ascii_case(benign_label) {
            return ThreatLevel::Red;
        }
        let runner_up = result.runner_up();
        if !runner_up.class.eq_ignore_ascii_case(benign_label)
            && runner_up.confidence >= suspicion_threshold
        {
            return ThreatLevel::Yellow;
        }
        ThreatLevel::Green
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::Red => write!(f, "RED"),
            ThreatLevel::Yellow => write!(f, "YELLOW"),
            ThreatLevel::Green => write!(f, "GREEN"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::net::IpAddr;

    pub fn result_with_top(top: &[(&str, f32)]) -> ClassificationResult {
        ClassificationResult {
            id: FlowId {
                src_ip: "10.0.0.1".parse::<IpAddr>().unwrap(),
                src_port: 40000,
                dst_ip: "192.168.1.10".parse::<IpAddr>().unwrap(),
                dst_port: 80,
                protocol: 6,
            },
            top: top
                .iter()
                .map(|(c, p)| RankedClass {
                    class: c.to_string(),
                    confidence: *p,
                })
                .collect(),
            timestamp: Utc::now(),
            label: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testutil::result_with_top;

    #[test]
    fn test_attack_top1_is_red() {
        let r = result_with_top(&[("DoS", 0.81), ("Benign", 0.12), ("Botnet", 0.07)]);
        assert_eq!(ThreatLevel::assess(&r, "Benign", 0.25), ThreatLevel::Red);
    }

    #[test]
    fn test_confident_runner_up_is_yellow() {
        let r = result_with_top(&[("Benign", 0.70), ("DoS", 0.26), ("Botnet", 0.04)]);
        assert_eq!(ThreatLevel::assess(&r, "Benign", 0.25), ThreatLevel::Yellow);
    }

    #[test]
    fn test_clean_flow_is_green() {
        let r = result_with_top(&[("Benign", 0.95), ("DoS", 0.03), ("Botnet", 0.02)]);
        assert_eq!(ThreatLevel::assess(&r, "Benign", 0.25), ThreatLevel::Green);
    }

    #[test]
    fn test_runner_up_below_threshold_is_green() {
        let r = result_with_top(&[("Benign", 0.70), ("DoS", 0.24), ("Botnet", 0.06)]);
        assert_eq!(ThreatLevel::assess(&r, "Benign", 0.25), ThreatLevel::Green);
    }

    #[test]
    fn test_assess_is_pure() {
        let r = result_with_top(&[("Benign", 0.70), ("DoS", 0.26), ("Botnet", 0.04)]);
        let first = ThreatLevel::assess(&r, "Benign", 0.25);
        for _ in 0..100 {
            assert_eq!(ThreatLevel::assess(&r, "Benign", 0.25), first);
        }
    }

    #[test]
    fn test_correctness_ignores_case() {
        let mut r = result_with_top(&[("DoS", 0.9), ("Benign", 0.08), ("Botnet", 0.02)]);
        r.label = Some("dos".to_string());
        assert_eq!(r.is_correct(), Some(true));
    }
}
