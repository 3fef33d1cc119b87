//! Pipeline engine
//!
//! Four stages on dedicated OS threads, connected by bounded queues:
//!
//! ```text
//! source -> preprocessor -> classifier -> report
//!                                     \-> threat handler (live only)
//! ```
//!
//! Every queue carries [`StreamItem`]s; shutdown is the end-of-stream marker
//! travelling the same path as the data. The engine spawns the workers, runs
//! the source loop, and joins everything once the reporter has finalized.

pub mod classify;
pub mod preprocess;
pub mod queue;
pub mod source;
pub mod threat;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlate::AttackCorrelator;
use crate::model::ClassifierModel;
use crate::report::{ReportSink, SessionTotals, SharedTotals};

use self::queue::{stage_queue, QueueSettings, SendOutcome};
use self::source::{FlowSource, SourcePoll};

/// Poll interval of the source loop; bounds how long a stop request can go
/// unobserved on a quiet stream.
const SOURCE_POLL: Duration = Duration::from_millis(100);

/// How the pipeline is fed and torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Long-lived stream, sparse arrivals, triage enabled.
    Live,
    /// Finite replay of a recorded flow set, triage bypassed.
    Batch,
}

#[derive(Debug, Default)]
struct StatsInner {
    flows_in: AtomicU64,
    schema_drops: AtomicU64,
    coerced_values: AtomicU64,
    inference_drops: AtomicU64,
    queue_drops: AtomicU64,
    results: AtomicU64,
    alerts_red: AtomicU64,
    alerts_yellow: AtomicU64,
    write_failures: AtomicU64,
}

/// Shared pipeline counters. Cheap to clone into every worker.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    inner: Arc<StatsInner>,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub flows_in: u64,
    pub schema_drops: u64,
    pub coerced_values: u64,
    pub inference_drops: u64,
    pub queue_drops: u64,
    pub results: u64,
    pub alerts_red: u64,
    pub alerts_yellow: u64,
    pub write_failures: u64,
}

impl PipelineStats {
    pub fn inc_flows_in(&self) {
        self.inner.flows_in.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_schema_drops(&self) {
        self.inner.schema_drops.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_coerced_values(&self) {
        self.inner.coerced_values.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_inference_drops(&self) {
        self.inner.inference_drops.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_queue_drops(&self) {
        self.inner.queue_drops.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_results(&self) {
        self.inner.results.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_alerts_red(&self) {
        self.inner.alerts_red.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_alerts_yellow(&self) {
        self.inner.alerts_yellow.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_write_failures(&self) {
        self.inner.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flows_in: self.inner.flows_in.load(Ordering::Relaxed),
            schema_drops: self.inner.schema_drops.load(Ordering::Relaxed),
            coerced_values: self.inner.coerced_values.load(Ordering::Relaxed),
            inference_drops: self.inner.inference_drops.load(Ordering::Relaxed),
            queue_drops: self.inner.queue_drops.load(Ordering::Relaxed),
            results: self.inner.results.load(Ordering::Relaxed),
            alerts_red: self.inner.alerts_red.load(Ordering::Relaxed),
            alerts_yellow: self.inner.alerts_yellow.load(Ordering::Relaxed),
            write_failures: self.inner.write_failures.load(Ordering::Relaxed),
        }
    }
}

fn queue_settings(config: &Config, mode: Mode) -> QueueSettings {
    let timeout_ms = match mode {
        Mode::Live => config.queues.live_timeout_ms,
        Mode::Batch => config.queues.batch_timeout_ms,
    };
    QueueSettings {
        capacity: config.queues.capacity,
        send_timeout: Duration::from_millis(timeout_ms),
        retries: config.queues.enqueue_retries,
    }
}

/// Owns the worker threads for one classification session.
pub struct PipelineEngine {
    config: Config,
    stats: PipelineStats,
    shared: SharedTotals,
    stop: Arc<AtomicBool>,
}

impl PipelineEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stats: PipelineStats::default(),
            shared: SharedTotals::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that makes the source loop stop yielding and emit the
    /// end-of-stream marker. Wired to Ctrl-C in live mode.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Read handle for the running session totals.
    pub fn shared_totals(&self) -> SharedTotals {
        self.shared.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Run one session to completion. Returns the final totals after the
    /// reporter has finalized its documents.
    pub fn run(
        &self,
        mode: Mode,
        mut flow_source: Box<dyn FlowSource>,
        sink: Box<dyn ReportSink>,
        model: Box<dyn ClassifierModel>,
    ) -> Result<SessionTotals> {
        let settings = queue_settings(&self.config, mode);
        let expected_len = model.schema().features.len();

        let (raw_tx, raw_rx) = stage_queue(settings);
        let (vec_tx, vec_rx) = stage_queue(settings);
        let (rep_tx, rep_rx) = stage_queue(settings);

        let correlator = if self.config.correlator.enabled {
            Some(AttackCorrelator::from_config(&self.config.correlator)?)
        } else {
            None
        };

        let preprocess_handle = thread::Builder::new()
            .name("preprocess".into())
            .spawn({
                let stats = self.stats.clone();
                let cfg = self.config.preprocessor.clone();
                move || preprocess::run(raw_rx, vec_tx, cfg, expected_len, &stats)
            })
            .context("failed to spawn preprocessor")?;

        let (threat_tx, threat_handle) = if mode == Mode::Live {
            let (threat_tx, threat_rx) = stage_queue(settings);
            let handle = thread::Builder::new()
                .name("threat".into())
                .spawn({
                    let stats = self.stats.clone();
                    let benign = self.config.model.benign_label.clone();
                    let threshold = self.config.threat.suspicion_threshold;
                    move || threat::run(threat_rx, benign, threshold, &stats)
                })
                .context("failed to spawn threat handler")?;
            (Some(threat_tx), Some(handle))
        } else {
            (None, None)
        };

        let classify_handle = thread::Builder::new()
            .name("classify".into())
            .spawn({
                let stats = self.stats.clone();
                let benign = self.config.model.benign_label.clone();
                move || classify::run(vec_rx, rep_tx, threat_tx, model, benign, correlator, &stats)
            })
            .context("failed to spawn classifier")?;

        let report_handle = thread::Builder::new()
            .name("report".into())
            .spawn({
                let stats = self.stats.clone();
                let shared = self.shared.clone();
                let benign = self.config.model.benign_label.clone();
                let threshold = self.config.threat.suspicion_threshold;
                move || crate::report::run(rep_rx, sink, benign, threshold, shared, &stats)
            })
            .context("failed to spawn reporter")?;

        // Source loop runs on the caller's thread. Exhaustion or the stop
        // flag ends the stream; the sentinel follows the last record. The
        // timed poll keeps the stop check live even when nothing arrives.
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("stop requested, ending flow stream");
                break;
            }
            let flow = match flow_source.poll_flow(SOURCE_POLL) {
                SourcePoll::Flow(flow) => flow,
                SourcePoll::Idle => continue,
                SourcePoll::Exhausted => {
                    debug!("flow source exhausted");
                    break;
                }
            };
            self.stats.inc_flows_in();
            match raw_tx.send_record("source", flow) {
                SendOutcome::Sent => {}
                SendOutcome::Dropped => self.stats.inc_queue_drops(),
                SendOutcome::Disconnected => {
                    warn!("raw flow queue closed, ending stream early");
                    break;
                }
            }
        }
        raw_tx.send_eos();
        drop(raw_tx);

        info!(
            read = flow_source.records_read(),
            rejected = flow_source.records_rejected(),
            "flow source closed"
        );

        preprocess_handle
            .join()
            .map_err(|_| anyhow::anyhow!("preprocessor panicked"))?;
        classify_handle
            .join()
            .map_err(|_| anyhow::anyhow!("classifier panicked"))?;
        if let Some(handle) = threat_handle {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("threat handler panicked"))?;
        }
        let totals = report_handle
            .join()
            .map_err(|_| anyhow::anyhow!("reporter panicked"))??;

        let snap = self.stats.snapshot();
        info!(
            flows_in = snap.flows_in,
            processed = totals.total,
            schema_drops = snap.schema_drops,
            inference_drops = snap.inference_drops,
            queue_drops = snap.queue_drops,
            "pipeline session complete"
        );
        Ok(totals)
    }
}
