//! Attack report correlation
//!
//! Optional side channel off the classifier: for every attack-classified
//! flow it maintains campaign metadata (first/last seen, distinct sources,
//! hit counts) and per-class running feature statistics, and compares the
//! live distributions against the training corpus baseline. Features whose
//! live mean drifts beyond the z-score threshold are logged periodically.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CorrelatorConfig;
use crate::core::flow::{FEATURE_NAMES, NUM_FEATURES};
use crate::core::result::PreparedVector;

/// Running statistics for a single feature (Welford's online algorithm).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for FeatureStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl FeatureStats {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn std(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Baseline distribution for one feature, exported by the training tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBaseline {
    pub mean: f64,
    pub std: f64,
}

/// Per-class training-corpus distributions.
#[derive(Debug, Deserialize)]
pub struct BaselineFile {
    /// Feature names, must match the canonical pipeline ordering.
    pub features: Vec<String>,
    /// One distribution per feature, per class.
    pub classes: BTreeMap<String, Vec<FeatureBaseline>>,
}

impl BaselineFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open baseline {}", path.as_ref().display()))?;
        let baseline: BaselineFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse baseline {}", path.as_ref().display()))?;
        if baseline.features.len() != NUM_FEATURES
            || baseline
                .features
                .iter()
                .zip(FEATURE_NAMES)
                .any(|(a, b)| a != b)
        {
            anyhow::bail!("baseline feature list does not match pipeline features");
        }
        for (class, stats) in &baseline.classes {
            if stats.len() != NUM_FEATURES {
                anyhow::bail!("baseline for class {} has wrong feature count", class);
            }
        }
        Ok(baseline)
    }
}

/// Campaign metadata for one attack class.
#[derive(Debug, Default)]
struct Campaign {
    hits: u64,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    sources: HashSet<IpAddr>,
}

/// A feature whose live distribution diverges from the training corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub feature: &'static str,
    pub zscore: f64,
}

/// Correlates attack-classified flows against training-corpus distributions.
pub struct AttackCorrelator {
    baseline: Option<BaselineFile>,
    campaigns: BTreeMap<String, Campaign>,
    live: BTreeMap<String, Vec<FeatureStats>>,
    zscore_threshold: f64,
    log_interval: u64,
    observations: u64,
}

impl AttackCorrelator {
    pub fn from_config(cfg: &CorrelatorConfig) -> Result<Self> {
        let baseline = match &cfg.baseline_path {
            Some(path) if path.exists() => Some(BaselineFile::load(path)?),
            Some(path) => {
                // Campaign logging still works without a baseline.
                warn!(
                    path = %path.display(),
                    "baseline not found, distribution comparison disabled"
                );
                None
            }
            None => None,
        };
        Ok(Self::new(baseline, cfg.zscore_threshold as f64, cfg.log_interval))
    }

    pub fn new(baseline: Option<BaselineFile>, zscore_threshold: f64, log_interval: u64) -> Self {
        Self {
            baseline,
            campaigns: BTreeMap::new(),
            live: BTreeMap::new(),
            zscore_threshold,
            log_interval: log_interval.max(1),
            observations: 0,
        }
    }

    /// Fold one attack-classified vector into the campaign and distribution
    /// state. Called by the classifier worker for non-benign predictions.
    pub fn observe(&mut self, class: &str, vector: &PreparedVector) {
        let now = Utc::now();
        let campaign = self.campaigns.entry(class.to_string()).or_default();
        campaign.hits += 1;
        campaign.first_seen.get_or_insert(now);
        campaign.last_seen = Some(now);
        campaign.sources.insert(vector.id.src_ip);

        let stats = self
            .live
            .entry(class.to_string())
            .or_insert_with(|| vec![FeatureStats::default(); NUM_FEATURES]);
        for (stat, value) in stats.iter_mut().zip(&vector.features) {
            stat.update(*value as f64);
        }

        self.observations += 1;
        if self.observations % self.log_interval == 0 {
            self.log_campaigns();
            for class in self.live.keys().cloned().collect::<Vec<_>>() {
                let diverged = self.divergences(&class);
                for d in diverged {
                    warn!(
                        class,
                        feature = d.feature,
                        zscore = d.zscore,
                        "live feature distribution diverges from training corpus"
                    );
                }
            }
        }
    }

    /// Features of a class whose live mean is beyond the z-score threshold
    /// relative to the training baseline.
    pub fn divergences(&self, class: &str) -> Vec<Divergence> {
        let Some(baseline) = &self.baseline else {
            return Vec::new();
        };
        let (Some(live), Some(base)) = (self.live.get(class), baseline.classes.get(class)) else {
            return Vec::new();
        };

        live.iter()
            .zip(base)
            .enumerate()
            .filter(|(_, (stat, _))| stat.count >= 2)
            .filter_map(|(idx, (stat, expected))| {
                if expected.std <= f64::EPSILON {
                    return None;
                }
                let z = (stat.mean - expected.mean) / expected.std;
                (z.abs() >= self.zscore_threshold).then(|| Divergence {
                    feature: FEATURE_NAMES[idx],
                    zscore: z,
                })
            })
            .collect()
    }

    /// Log the campaign table.
    pub fn log_campaigns(&self) {
        for (class, campaign) in &self.campaigns {
            let first = campaign.first_seen.map(|t| t.to_rfc3339()).unwrap_or_default();
            let last = campaign.last_seen.map(|t| t.to_rfc3339()).unwrap_or_default();
            info!(
                class,
                hits = campaign.hits,
                sources = campaign.sources.len(),
                first_seen = %first,
                last_seen = %last,
                "attack campaign"
            );
        }
    }

    /// Attack observations folded in so far.
    pub fn observations(&self) -> u64 {
        self.observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::testutil;

    fn baseline_for(classes: &[&str]) -> BaselineFile {
        BaselineFile {
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classes: classes
                .iter()
                .map(|c| {
                    (
                        c.to_string(),
                        vec![FeatureBaseline { mean: 0.0, std: 1.0 }; NUM_FEATURES],
                    )
                })
                .collect(),
        }
    }

    fn vector(src_port: u16, fwd_packets: f64) -> PreparedVector {
        let mut flow = testutil::flow_with_port(src_port, None);
        flow.total_fwd_packets = fwd_packets;
        PreparedVector {
            features: flow.feature_values().iter().map(|v| *v as f32).collect(),
            id: flow.id(),
            label: None,
        }
    }

    #[test]
    fn test_welford_stats() {
        let mut stats = FeatureStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.update(v);
        }
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.std() - 2.138089935).abs() < 1e-6);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn test_divergence_flags_shifted_feature_only() {
        let mut corr = AttackCorrelator::new(Some(baseline_for(&["DoS"])), 3.0, 1000);
        // total_fwd_packets sits far from the baseline mean of 0; untouched
        // features stay at 0 and must not be flagged. dst_port (443) shifts
        // too, by construction of the test flow.
        for port in 0..10 {
            corr.observe("DoS", &vector(40000 + port, 50.0));
        }
        let diverged = corr.divergences("DoS");
        assert!(diverged.iter().any(|d| d.feature == "total_fwd_packets"));
        assert!(diverged.iter().all(|d| d.zscore.abs() >= 3.0));
        assert!(!diverged.iter().any(|d| d.feature == "flow_iat_mean"));
    }

    #[test]
    fn test_no_baseline_no_divergences() {
        let mut corr = AttackCorrelator::new(None, 3.0, 1000);
        corr.observe("DoS", &vector(1, 50.0));
        assert!(corr.divergences("DoS").is_empty());
        assert_eq!(corr.observations(), 1);
    }

    #[test]
    fn test_campaign_tracks_distinct_sources() {
        let mut corr = AttackCorrelator::new(None, 3.0, 1000);
        for port in [1, 2, 2, 3] {
            corr.observe("Botnet", &vector(port, 10.0));
        }
        // Same src_ip for every test flow: one distinct source.
        let campaign = corr.campaigns.get("Botnet").unwrap();
        assert_eq!(campaign.hits, 4);
        assert_eq!(campaign.sources.len(), 1);
        assert!(campaign.first_seen.is_some());
    }

    #[test]
    fn test_unknown_class_in_baseline_ignored() {
        let mut corr = AttackCorrelator::new(Some(baseline_for(&["DoS"])), 3.0, 1000);
        corr.observe("Heartbleed", &vector(1, 50.0));
        corr.observe("Heartbleed", &vector(2, 50.0));
        assert!(corr.divergences("Heartbleed").is_empty());
    }
}
