//! Preprocessor stage
//!
//! Turns variable-shape raw flows into fixed-length prepared vectors via
//! micro-batching: records accumulate until the batch size is reached or the
//! max-wait since the batch became non-empty elapses, whichever fires first.
//! When both trigger in the same tick the size check wins (it is evaluated
//! first). Input order is preserved within and across batches.

use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::config::PreprocessorConfig;
use crate::core::flow::RawFlow;
use crate::core::item::StreamItem;
use crate::core::result::PreparedVector;

use super::queue::{SendOutcome, StageReceiver, StageSender};
use super::PipelineStats;

/// Poll interval while the batch buffer is empty.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Micro-batching buffer.
pub struct Preprocessor {
    batch: Vec<RawFlow>,
    batch_size: usize,
    max_wait: Duration,
    /// Required vector length, from the model schema.
    expected_len: usize,
    /// Set when the buffer becomes non-empty; cleared on flush.
    deadline: Option<Instant>,
}

/// Outcome of preparing one record.
enum Prepared {
    Vector(PreparedVector),
    /// Record could not be aligned with the model schema; dropped with a
    /// logged reason, batch continues.
    SchemaDrop,
}

impl Preprocessor {
    pub fn new(cfg: &PreprocessorConfig, expected_len: usize) -> Self {
        Self {
            batch: Vec::with_capacity(cfg.batch_size),
            batch_size: cfg.batch_size.max(1),
            max_wait: cfg.max_wait(),
            expected_len,
            deadline: None,
        }
    }

    /// Enqueue one record; returns the transformed batch if the size
    /// threshold was reached.
    pub fn submit(&mut self, flow: RawFlow, stats: &PipelineStats) -> Option<Vec<PreparedVector>> {
        if self.batch.is_empty() {
            self.deadline = Some(Instant::now() + self.max_wait);
        }
        self.batch.push(flow);
        // Size check first: pinned tie-break against the max-wait trigger.
        if self.batch.len() >= self.batch_size {
            return Some(self.flush(stats));
        }
        None
    }

    /// Transform and clear the current batch, preserving input order.
    pub fn flush(&mut self, stats: &PipelineStats) -> Vec<PreparedVector> {
        self.deadline = None;
        let batch = std::mem::take(&mut self.batch);
        let mut prepared = Vec::with_capacity(batch.len());
        for flow in batch {
            match self.prepare(&flow, stats) {
                Prepared::Vector(v) => prepared.push(v),
                Prepared::SchemaDrop => {
                    stats.inc_schema_drops();
                    warn!(flow = %flow.id(), "dropping unalignable record");
                }
            }
        }
        prepared
    }

    /// Time left until the max-wait flush, if a batch is pending.
    pub fn time_until_flush(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the max-wait deadline has passed.
    pub fn wait_expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    fn prepare(&self, flow: &RawFlow, stats: &PipelineStats) -> Prepared {
        let values = flow.feature_values();
        if values.len() != self.expected_len {
            return Prepared::SchemaDrop;
        }
        let features = values
            .into_iter()
            .map(|v| {
                if v.is_finite() {
                    v as f32
                } else {
                    // Domain policy: non-finite feature values become 0.
                    stats.inc_coerced_values();
                    0.0
                }
            })
            .collect();
        Prepared::Vector(PreparedVector {
            features,
            id: flow.id(),
            label: flow.label.clone(),
        })
    }
}

/// Stage worker: consume raw flows, emit prepared vectors downstream.
pub fn run(
    rx: StageReceiver<RawFlow>,
    tx: StageSender<PreparedVector>,
    cfg: PreprocessorConfig,
    expected_len: usize,
    stats: &PipelineStats,
) {
    let mut pre = Preprocessor::new(&cfg, expected_len);

    loop {
        if pre.wait_expired() {
            debug!(pending = pre.pending(), "max-wait flush");
            if !emit(&tx, pre.flush(stats), stats) {
                break;
            }
        }

        let timeout = pre.time_until_flush().unwrap_or(IDLE_POLL);
        match rx.recv_timeout(timeout) {
            Ok(StreamItem::Record(flow)) => {
                if let Some(batch) = pre.submit(flow, stats) {
                    if !emit(&tx, batch, stats) {
                        break;
                    }
                }
            }
            Ok(StreamItem::EndOfStream) => {
                emit(&tx, pre.flush(stats), stats);
                tx.send_eos();
                let leftover = rx.drain(|flow| {
                    warn!(flow = %flow.id(), "record raced the end-of-stream marker, dropping");
                    stats.inc_queue_drops();
                });
                if leftover > 0 {
                    warn!(leftover, "drained records after end-of-stream");
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                // Loop re-checks the flush deadline.
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("input queue closed, flushing and stopping preprocessor");
                emit(&tx, pre.flush(stats), stats);
                tx.send_eos();
                break;
            }
        }
    }

    debug!("preprocessor stopped");
}

/// Forward a batch downstream in order. Returns false when the consumer is
/// gone and the stage should stop.
fn emit(tx: &StageSender<PreparedVector>, batch: Vec<PreparedVector>, stats: &PipelineStats) -> bool {
    for vector in batch {
        match tx.send_record("preprocess", vector) {
            SendOutcome::Sent => {}
            SendOutcome::Dropped => stats.inc_queue_drops(),
            SendOutcome::Disconnected => return false,
        }
    }
    true
}
