//! Classifier stage
//!
//! Invokes the loaded model once per prepared vector and ranks the top-3
//! candidate classes. This is the pipeline's fan-out point: every result goes
//! to the report queue, and in live mode also to the threat queue. Inference
//! failures drop the record; the worker never crashes on a bad vector.

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::core::item::StreamItem;
use crate::core::result::{ClassificationResult, PreparedVector, RankedClass, TOP_K};
use crate::correlate::AttackCorrelator;
use crate::model::{ClassifierModel, ModelError};

use super::queue::{SendOutcome, StageReceiver, StageSender};
use super::PipelineStats;

const RECV_POLL: Duration = Duration::from_millis(100);

/// Classify one prepared vector: predict, stable-sort descending, take the
/// top 3, carry the identifiers and label through unchanged.
pub fn classify(
    model: &dyn ClassifierModel,
    vector: &PreparedVector,
) -> Result<ClassificationResult, ModelError> {
    let probs = model.predict_probabilities(&vector.features)?;
    let classes = &model.schema().classes;

    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    // Stable sort: equal confidences keep the model's class order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let top = ranked
        .into_iter()
        .take(TOP_K)
        .map(|(idx, confidence)| RankedClass {
            class: classes[idx].clone(),
            confidence,
        })
        .collect();

    Ok(ClassificationResult {
        id: vector.id.clone(),
        top,
        timestamp: Utc::now(),
        label: vector.label.clone(),
    })
}

/// Stage worker. `threat_tx` is `None` in batch mode, where triage is
/// bypassed entirely.
pub fn run(
    rx: StageReceiver<PreparedVector>,
    report_tx: StageSender<ClassificationResult>,
    threat_tx: Option<StageSender<ClassificationResult>>,
    model: Box<dyn ClassifierModel>,
    benign_label: String,
    mut correlator: Option<AttackCorrelator>,
    stats: &PipelineStats,
) {
    loop {
        match rx.recv_timeout(RECV_POLL) {
            Ok(StreamItem::Record(vector)) => {
                let result = match classify(model.as_ref(), &vector) {
                    Ok(result) => result,
                    Err(e) => {
                        stats.inc_inference_drops();
                        warn!(flow = %vector.id, "inference failed, dropping record: {}", e);
                        continue;
                    }
                };

                if let Some(correlator) = correlator.as_mut() {
                    let predicted = result.predicted();
                    if !predicted.class.eq_ignore_ascii_case(&benign_label) {
                        correlator.observe(&predicted.class, &vector);
                    }
                }

                if let Some(tx) = &threat_tx {
                    match tx.send_record("classify", result.clone()) {
                        SendOutcome::Sent => {}
                        SendOutcome::Dropped => stats.inc_queue_drops(),
                        // Triage gone is not fatal for reporting.
                        SendOutcome::Disconnected => {}
                    }
                }
                match report_tx.send_record("classify", result) {
                    SendOutcome::Sent => stats.inc_results(),
                    SendOutcome::Dropped => stats.inc_queue_drops(),
                    SendOutcome::Disconnected => break,
                }
            }
            Ok(StreamItem::EndOfStream) => {
                // Forward exactly one sentinel to each output queue.
                if let Some(tx) = &threat_tx {
                    tx.send_eos();
                }
                report_tx.send_eos();
                let leftover = rx.drain(|vector| {
                    warn!(flow = %vector.id, "record raced the end-of-stream marker, dropping");
                    stats.inc_queue_drops();
                });
                if leftover > 0 {
                    warn!(leftover, "drained vectors after end-of-stream");
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("input queue closed, stopping classifier");
                if let Some(tx) = &threat_tx {
                    tx.send_eos();
                }
                report_tx.send_eos();
                break;
            }
        }
    }

    if let Some(correlator) = correlator.as_mut() {
        correlator.log_campaigns();
    }
    debug!("classifier stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::{testutil as flowutil, NUM_FEATURES};
    use crate::model::testutil::constant_model;
    use crate::model::{ModelSchema, SoftmaxModel};
    use crate::pipeline::queue::{stage_queue, QueueSettings};

    fn prepared(port: u16) -> PreparedVector {
        let flow = flowutil::flow_with_port(port, None);
        PreparedVector {
            features: flow.feature_values().iter().map(|v| *v as f32).collect(),
            id: flow.id(),
            label: None,
        }
    }

    #[test]
    fn test_top3_ranked_descending() {
        let model = constant_model(&["Benign", "DoS", "Botnet", "PortScan"], &[0.2, 2.0, 1.0, 0.5]);
        let result = classify(&model, &prepared(1)).unwrap();
        assert_eq!(result.top.len(), TOP_K);
        assert_eq!(result.top[0].class, "DoS");
        assert_eq!(result.top[1].class, "Botnet");
        assert_eq!(result.top[2].class, "PortScan");
        assert!(result.top[0].confidence >= result.top[1].confidence);
        assert!(result.top[1].confidence >= result.top[2].confidence);
    }

    #[test]
    fn test_ties_keep_model_class_order() {
        let model = constant_model(&["Benign", "DoS", "Botnet"], &[0.0, 0.0, 0.0]);
        let result = classify(&model, &prepared(1)).unwrap();
        // All probabilities equal: stable sort keeps schema order.
        assert_eq!(result.top[0].class, "Benign");
        assert_eq!(result.top[1].class, "DoS");
        assert_eq!(result.top[2].class, "Botnet");
    }

    #[test]
    fn test_identifiers_carried_unchanged() {
        let model = constant_model(&["Benign", "DoS", "Botnet"], &[1.0, 0.0, 0.0]);
        let vector = prepared(4242);
        let result = classify(&model, &vector).unwrap();
        assert_eq!(result.id, vector.id);
    }

    /// Model that always fails, for drop-path tests.
    struct BrokenModel(ModelSchema);

    impl ClassifierModel for BrokenModel {
        fn schema(&self) -> &ModelSchema {
            &self.0
        }
        fn predict_probabilities(&self, _: &[f32]) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::ShapeMismatch {
                expected: NUM_FEATURES,
                actual: 0,
            })
        }
    }

    #[test]
    fn test_inference_error_drops_record_worker_survives() {
        let settings = QueueSettings {
            capacity: 16,
            send_timeout: Duration::from_millis(10),
            retries: 1,
        };
        let (vec_tx, vec_rx) = stage_queue::<PreparedVector>(settings);
        let (rep_tx, rep_rx) = stage_queue::<ClassificationResult>(settings);
        let stats = PipelineStats::default();

        let handle = std::thread::spawn({
            let stats = stats.clone();
            move || {
                run(
                    vec_rx,
                    rep_tx,
                    None,
                    Box::new(BrokenModel(crate::model::testutil::schema(&[
                        "Benign", "DoS", "Botnet",
                    ]))),
                    "Benign".into(),
                    None,
                    &stats,
                )
            }
        });

        vec_tx.send_record("test", prepared(1));
        vec_tx.send_record("test", prepared(2));
        vec_tx.send_eos();
        handle.join().unwrap();

        // Only the sentinel comes out; both records were dropped.
        assert!(matches!(
            rep_rx.recv_timeout(Duration::from_millis(200)),
            Ok(StreamItem::EndOfStream)
        ));
        assert_eq!(stats.snapshot().inference_drops, 2);
    }

    #[test]
    fn test_fanout_forwards_eos_to_both_outputs() {
        let settings = QueueSettings {
            capacity: 16,
            send_timeout: Duration::from_millis(10),
            retries: 1,
        };
        let (vec_tx, vec_rx) = stage_queue::<PreparedVector>(settings);
        let (rep_tx, rep_rx) = stage_queue::<ClassificationResult>(settings);
        let (thr_tx, thr_rx) = stage_queue::<ClassificationResult>(settings);
        let stats = PipelineStats::default();

        let model: SoftmaxModel = constant_model(&["Benign", "DoS", "Botnet"], &[1.0, 0.5, 0.1]);
        let handle = std::thread::spawn({
            let stats = stats.clone();
            move || {
                run(
                    vec_rx,
                    rep_tx,
                    Some(thr_tx),
                    Box::new(model),
                    "Benign".into(),
                    None,
                    &stats,
                )
            }
        });

        vec_tx.send_record("test", prepared(9));
        vec_tx.send_eos();
        handle.join().unwrap();

        for rx in [&rep_rx, &thr_rx] {
            assert!(matches!(
                rx.recv_timeout(Duration::from_millis(200)),
                Ok(StreamItem::Record(_))
            ));
            assert!(matches!(
                rx.recv_timeout(Duration::from_millis(200)),
                Ok(StreamItem::EndOfStream)
            ));
        }
    }
}
