//! Threat triage stage (live mode only)
//!
//! Pure derivation over classification results: RED and YELLOW alerts render
//! synchronously before the next item is consumed, GREEN is counted and never
//! rendered. Rendering failures are logged and never stop consumption.

use std::io::Write;
use std::time::Duration;

use colored::Colorize;
use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, warn};

use crate::core::item::StreamItem;
use crate::core::result::{ClassificationResult, ThreatLevel};

use super::queue::StageReceiver;
use super::PipelineStats;

const RECV_POLL: Duration = Duration::from_millis(100);

/// Render one RED/YELLOW alert to the operator terminal.
fn render_alert(
    out: &mut impl Write,
    level: ThreatLevel,
    result: &ClassificationResult,
) -> std::io::Result<()> {
    let predicted = result.predicted();
    let (tag, class, confidence) = match level {
        ThreatLevel::Red => (
            " RED ".on_red().white().bold(),
            predicted.class.as_str(),
            predicted.confidence,
        ),
        ThreatLevel::Yellow => (
            " YELLOW ".on_yellow().black().bold(),
            result.runner_up().class.as_str(),
            result.runner_up().confidence,
        ),
        // Never rendered; counted by the caller.
        ThreatLevel::Green => return Ok(()),
    };
    writeln!(
        out,
        "{} {} {} {} ({:.1}%)",
        tag,
        result.timestamp.format("%H:%M:%S"),
        result.id,
        class.bold(),
        confidence * 100.0
    )
}

/// Stage worker: assess every result, alert on RED/YELLOW.
pub fn run(
    rx: StageReceiver<ClassificationResult>,
    benign_label: String,
    suspicion_threshold: f32,
    stats: &PipelineStats,
) {
    let stdout = std::io::stdout();

    loop {
        match rx.recv_timeout(RECV_POLL) {
            Ok(StreamItem::Record(result)) => {
                let level = ThreatLevel::assess(&result, &benign_label, suspicion_threshold);
                match level {
                    ThreatLevel::Red => stats.inc_alerts_red(),
                    ThreatLevel::Yellow => stats.inc_alerts_yellow(),
                    ThreatLevel::Green => continue,
                }
                if let Err(e) = render_alert(&mut stdout.lock(), level, &result) {
                    warn!(flow = %result.id, "failed to render alert: {}", e);
                }
            }
            Ok(StreamItem::EndOfStream) => {
                let leftover = rx.drain(|result| {
                    debug!(flow = %result.id, "result raced the end-of-stream marker");
                });
                if leftover > 0 {
                    warn!(leftover, "drained results after end-of-stream");
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("threat handler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::testutil::result_with_top;
    use crate::pipeline::queue::{stage_queue, QueueSettings};

    #[test]
    fn test_render_green_writes_nothing() {
        let r = result_with_top(&[("Benign", 0.95), ("DoS", 0.03), ("Botnet", 0.02)]);
        let mut buf = Vec::new();
        render_alert(&mut buf, ThreatLevel::Green, &r).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_render_red_names_top_class() {
        colored::control::set_override(false);
        let r = result_with_top(&[("DoS", 0.81), ("Benign", 0.12), ("Botnet", 0.07)]);
        let mut buf = Vec::new();
        render_alert(&mut buf, ThreatLevel::Red, &r).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.contains("RED"));
        assert!(line.contains("DoS"));
        assert!(line.contains("81.0%"));
    }

    #[test]
    fn test_render_yellow_names_runner_up() {
        colored::control::set_override(false);
        let r = result_with_top(&[("Benign", 0.70), ("DoS", 0.26), ("Botnet", 0.04)]);
        let mut buf = Vec::new();
        render_alert(&mut buf, ThreatLevel::Yellow, &r).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.contains("YELLOW"));
        assert!(line.contains("DoS"));
        assert!(line.contains("26.0%"));
    }

    #[test]
    fn test_worker_counts_and_terminates_on_eos() {
        let settings = QueueSettings {
            capacity: 16,
            send_timeout: Duration::from_millis(10),
            retries: 1,
        };
        let (tx, rx) = stage_queue::<ClassificationResult>(settings);
        let stats = PipelineStats::default();

        let handle = std::thread::spawn({
            let stats = stats.clone();
            move || run(rx, "Benign".into(), 0.25, &stats)
        });

        tx.send_record(
            "test",
            result_with_top(&[("DoS", 0.81), ("Benign", 0.12), ("Botnet", 0.07)]),
        );
        tx.send_record(
            "test",
            result_with_top(&[("Benign", 0.70), ("DoS", 0.26), ("Botnet", 0.04)]),
        );
        tx.send_record(
            "test",
            result_with_top(&[("Benign", 0.95), ("DoS", 0.03), ("Botnet", 0.02)]),
        );
        tx.send_eos();
        handle.join().unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.alerts_red, 1);
        assert_eq!(snap.alerts_yellow, 1);
    }
}
