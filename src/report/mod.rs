//! Report generation
//!
//! The reporter is the pipeline's durable terminal stage. Live mode writes
//! rotating per-minute files; batch mode buffers rows in memory and writes
//! one results document plus one summary at end-of-run. Threat levels are
//! derived here through the same [`ThreatLevel::assess`] the threat handler
//! uses, so the two can never disagree.
//!
//! Per-row write failures are logged and skipped; only a failed summary
//! finalization is a terminal session error.

pub mod batch;
pub mod live;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::item::StreamItem;
use crate::core::result::{ClassificationResult, ThreatLevel};
use crate::pipeline::queue::StageReceiver;
use crate::pipeline::{PipelineStats, StatsSnapshot};

const RECV_POLL: Duration = Duration::from_millis(100);

/// Accumulated per-session counters. Mutated only by the report worker;
/// external readers get a synchronized snapshot via [`SharedTotals`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionTotals {
    pub total: u64,
    pub red: u64,
    pub yellow: u64,
    pub green: u64,
    /// Rows per predicted class.
    pub per_class: BTreeMap<String, u64>,
    /// Rows carrying a ground-truth label.
    pub labeled: u64,
    /// Labeled rows whose prediction matched.
    pub correct: u64,
    /// Correct rows per predicted class, for precision.
    pub per_class_correct: BTreeMap<String, u64>,
}

impl SessionTotals {
    /// Fold one result into the counters.
    pub fn record(&mut self, result: &ClassificationResult, level: ThreatLevel) {
        self.total += 1;
        match level {
            ThreatLevel::Red => self.red += 1,
            ThreatLevel::Yellow => self.yellow += 1,
            ThreatLevel::Green => self.green += 1,
        }
        let predicted = result.predicted().class.clone();
        *self.per_class.entry(predicted.clone()).or_default() += 1;
        if let Some(correct) = result.is_correct() {
            self.labeled += 1;
            if correct {
                self.correct += 1;
                *self.per_class_correct.entry(predicted).or_default() += 1;
            }
        }
    }

    /// Running accuracy over labeled rows, if any were seen.
    pub fn accuracy(&self) -> Option<f64> {
        (self.labeled > 0).then(|| self.correct as f64 / self.labeled as f64)
    }

    /// Accuracy rendered for the summary, e.g. `87.00%`.
    pub fn accuracy_display(&self) -> Option<String> {
        self.accuracy().map(|a| format!("{:.2}%", a * 100.0))
    }

    /// Precision per predicted class over labeled rows.
    pub fn precision_by_class(&self) -> BTreeMap<String, f64> {
        self.per_class
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(class, &count)| {
                let correct = self.per_class_correct.get(class).copied().unwrap_or(0);
                (class.clone(), correct as f64 / count as f64)
            })
            .collect()
    }
}

/// Read handle for session totals outside the report worker.
pub type SharedTotals = Arc<RwLock<SessionTotals>>;

/// Destination for classified rows: live minute files or a batch buffer.
pub trait ReportSink: Send {
    /// Persist one row. An error here is logged and the row skipped; the
    /// session continues.
    fn record(&mut self, result: &ClassificationResult, level: ThreatLevel) -> Result<()>;

    /// Flush everything and write the end-of-session summary. An error here
    /// is terminal for the session.
    fn finalize(&mut self, totals: &SessionTotals, pipeline: &StatsSnapshot) -> Result<()>;
}

/// Stage worker: consume results until the sentinel, then finalize.
pub fn run(
    rx: StageReceiver<ClassificationResult>,
    mut sink: Box<dyn ReportSink>,
    benign_label: String,
    suspicion_threshold: f32,
    shared: SharedTotals,
    stats: &PipelineStats,
) -> Result<SessionTotals> {
    let mut totals = SessionTotals::default();

    let handle_row = |result: &ClassificationResult,
                          totals: &mut SessionTotals,
                          sink: &mut Box<dyn ReportSink>| {
        let level = ThreatLevel::assess(result, &benign_label, suspicion_threshold);
        totals.record(result, level);
        if let Err(e) = sink.record(result, level) {
            stats.inc_write_failures();
            warn!(flow = %result.id, "report row write failed, skipping: {:#}", e);
        }
        *shared.write() = totals.clone();
    };

    loop {
        match rx.recv_timeout(RECV_POLL) {
            Ok(StreamItem::Record(result)) => handle_row(&result, &mut totals, &mut sink),
            Ok(StreamItem::EndOfStream) => {
                // Catch rows that raced the sentinel, then finalize.
                let leftover = rx.drain(|result| handle_row(&result, &mut totals, &mut sink));
                if leftover > 0 {
                    debug!(leftover, "recorded rows drained after end-of-stream");
                }
                sink.finalize(&totals, &stats.snapshot())
                    .context("failed to finalize session summary")?;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("result queue closed without end-of-stream, finalizing anyway");
                sink.finalize(&totals, &stats.snapshot())
                    .context("failed to finalize session summary")?;
                break;
            }
        }
    }

    info!(
        total = totals.total,
        red = totals.red,
        yellow = totals.yellow,
        green = totals.green,
        "report session closed"
    );
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::testutil::result_with_top;
    use crate::pipeline::queue::{stage_queue, QueueSettings};

    #[derive(Default)]
    struct MemorySink {
        rows: Vec<(String, ThreatLevel)>,
        finalized: bool,
        fail_rows: bool,
    }

    struct SharedSink(Arc<parking_lot::Mutex<MemorySink>>);

    impl ReportSink for SharedSink {
        fn record(&mut self, result: &ClassificationResult, level: ThreatLevel) -> Result<()> {
            let mut inner = self.0.lock();
            if inner.fail_rows {
                anyhow::bail!("disk unhappy");
            }
            inner.rows.push((result.predicted().class.clone(), level));
            Ok(())
        }

        fn finalize(&mut self, _: &SessionTotals, _: &StatsSnapshot) -> Result<()> {
            self.0.lock().finalized = true;
            Ok(())
        }
    }

    fn spawn_worker(
        sink: SharedSink,
        stats: PipelineStats,
    ) -> (
        crate::pipeline::queue::StageSender<ClassificationResult>,
        std::thread::JoinHandle<Result<SessionTotals>>,
        SharedTotals,
    ) {
        let settings = QueueSettings {
            capacity: 32,
            send_timeout: Duration::from_millis(10),
            retries: 1,
        };
        let (tx, rx) = stage_queue(settings);
        let shared: SharedTotals = Arc::default();
        let shared_clone = shared.clone();
        let handle = std::thread::spawn(move || {
            run(rx, Box::new(sink), "Benign".into(), 0.25, shared_clone, &stats)
        });
        (tx, handle, shared)
    }

    #[test]
    fn test_levels_match_threat_handler_rule() {
        let inner = Arc::new(parking_lot::Mutex::new(MemorySink::default()));
        let (tx, handle, _) = spawn_worker(SharedSink(inner.clone()), PipelineStats::default());

        let cases = [
            result_with_top(&[("DoS", 0.81), ("Benign", 0.12), ("Botnet", 0.07)]),
            result_with_top(&[("Benign", 0.70), ("DoS", 0.26), ("Botnet", 0.04)]),
            result_with_top(&[("Benign", 0.95), ("DoS", 0.03), ("Botnet", 0.02)]),
        ];
        for case in &cases {
            tx.send_record("test", case.clone());
        }
        tx.send_eos();
        let totals = handle.join().unwrap().unwrap();

        // The reporter and the threat handler derive through the same assess.
        let sink = inner.lock();
        for (i, case) in cases.iter().enumerate() {
            assert_eq!(sink.rows[i].1, ThreatLevel::assess(case, "Benign", 0.25));
        }
        assert!(sink.finalized);
        assert_eq!((totals.red, totals.yellow, totals.green), (1, 1, 1));
    }

    #[test]
    fn test_row_failure_skipped_session_continues() {
        let inner = Arc::new(parking_lot::Mutex::new(MemorySink {
            fail_rows: true,
            ..Default::default()
        }));
        let stats = PipelineStats::default();
        let (tx, handle, shared) = spawn_worker(SharedSink(inner.clone()), stats.clone());

        tx.send_record(
            "test",
            result_with_top(&[("Benign", 0.9), ("DoS", 0.06), ("Botnet", 0.04)]),
        );
        tx.send_eos();
        let totals = handle.join().unwrap().unwrap();

        // Row write failed but the session still counted and finalized.
        assert_eq!(totals.total, 1);
        assert_eq!(stats.snapshot().write_failures, 1);
        assert!(inner.lock().finalized);
        assert_eq!(shared.read().total, 1);
    }

    #[test]
    fn test_accuracy_display_exact() {
        let mut totals = SessionTotals::default();
        for i in 0..100u32 {
            let mut r = result_with_top(&[("DoS", 0.9), ("Benign", 0.06), ("Botnet", 0.04)]);
            r.label = Some(if i < 87 { "DoS" } else { "Benign" }.to_string());
            let level = ThreatLevel::assess(&r, "Benign", 0.25);
            totals.record(&r, level);
        }
        assert_eq!(totals.accuracy_display().as_deref(), Some("87.00%"));
        assert_eq!(totals.precision_by_class().get("DoS"), Some(&0.87));
    }
}
