//! Batch-mode reporting
//!
//! Rows accumulate in memory for the whole replay; one results document
//! (CSV) and one summary document (JSON) are written only after the
//! end-of-stream marker. With ground-truth labels present the summary
//! reports accuracy and per-predicted-class precision.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::core::result::{ClassificationResult, ThreatLevel};
use crate::pipeline::StatsSnapshot;

use super::{ReportSink, SessionTotals};

/// One row of the batch results document.
#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    timestamp: String,
    src_ip: String,
    src_port: u16,
    dst_ip: String,
    dst_port: u16,
    protocol: u8,
    predicted: &'a str,
    confidence: f32,
    second: &'a str,
    second_confidence: f32,
    third: &'a str,
    third_confidence: f32,
    level: String,
    label: Option<&'a str>,
}

/// Per-class entry in the summary document.
#[derive(Debug, Serialize)]
struct ClassSummary {
    count: u64,
    /// Present only when labeled rows were seen for this class.
    #[serde(skip_serializing_if = "Option::is_none")]
    precision: Option<f64>,
}

/// The batch summary document.
#[derive(Debug, Serialize)]
struct BatchSummary {
    session: Uuid,
    generated_at: DateTime<Utc>,
    /// Records the source yielded, for drop auditing.
    input: u64,
    processed: u64,
    schema_drops: u64,
    inference_drops: u64,
    queue_drops: u64,
    threat: u64,
    suspicious: u64,
    clean: u64,
    classes: BTreeMap<String, ClassSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    /// Rendered accuracy, e.g. `87.00%`.
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy_display: Option<String>,
}

/// In-memory reporter for finite replays.
pub struct BatchReporter {
    dir: PathBuf,
    session_id: Uuid,
    rows: Vec<(ClassificationResult, ThreatLevel)>,
}

impl BatchReporter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        Ok(Self {
            dir,
            session_id: Uuid::new_v4(),
            rows: Vec::new(),
        })
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(format!("results-{}.csv", self.session_id))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(format!("summary-{}.json", self.session_id))
    }

    fn write_results(&self) -> Result<()> {
        let path = self.results_path();
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create results document {}", path.display()))?;
        for (result, level) in &self.rows {
            writer.serialize(ResultRow {
                timestamp: result.timestamp.to_rfc3339(),
                src_ip: result.id.src_ip.to_string(),
                src_port: result.id.src_port,
                dst_ip: result.id.dst_ip.to_string(),
                dst_port: result.id.dst_port,
                protocol: result.id.protocol,
                predicted: &result.top[0].class,
                confidence: result.top[0].confidence,
                second: &result.top[1].class,
                second_confidence: result.top[1].confidence,
                third: &result.top[2].class,
                third_confidence: result.top[2].confidence,
                level: level.to_string(),
                label: result.label.as_deref(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_summary(&self, totals: &SessionTotals, pipeline: &StatsSnapshot) -> Result<()> {
        let precision = totals.precision_by_class();
        let classes = totals
            .per_class
            .iter()
            .map(|(class, &count)| {
                (
                    class.clone(),
                    ClassSummary {
                        count,
                        precision: (totals.labeled > 0)
                            .then(|| precision.get(class).copied().unwrap_or(0.0)),
                    },
                )
            })
            .collect();

        let summary = BatchSummary {
            session: self.session_id,
            generated_at: Utc::now(),
            input: pipeline.flows_in,
            processed: totals.total,
            schema_drops: pipeline.schema_drops,
            inference_drops: pipeline.inference_drops,
            queue_drops: pipeline.queue_drops,
            threat: totals.red,
            suspicious: totals.yellow,
            clean: totals.green,
            classes,
            accuracy: totals.accuracy(),
            accuracy_display: totals.accuracy_display(),
        };

        let path = self.summary_path();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create summary document {}", path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;
        Ok(())
    }
}

impl ReportSink for BatchReporter {
    fn record(&mut self, result: &ClassificationResult, level: ThreatLevel) -> Result<()> {
        self.rows.push((result.clone(), level));
        Ok(())
    }

    fn finalize(&mut self, totals: &SessionTotals, pipeline: &StatsSnapshot) -> Result<()> {
        self.write_results()?;
        self.write_summary(totals, pipeline)?;
        info!(
            results = %self.results_path().display(),
            summary = %self.summary_path().display(),
            rows = self.rows.len(),
            "batch documents written"
        );
        Ok(())
    }
}
