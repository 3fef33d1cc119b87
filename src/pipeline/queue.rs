//! Bounded stage queues
//!
//! Every stage boundary is a bounded crossbeam channel of [`StreamItem`]s.
//! Bounded capacity is the pipeline's only flow-control mechanism: a full
//! queue pushes back on the producer via `send_timeout`, with a bounded
//! number of retries before the record is logged and dropped. The
//! end-of-stream marker is never dropped; it is sent blocking.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::core::item::StreamItem;

/// Enqueue behavior for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    /// Per-attempt `send_timeout` for data records.
    pub send_timeout: Duration,
    /// Attempts beyond the first before log-and-drop.
    pub retries: u32,
}

/// Create a bounded stage queue.
pub fn stage_queue<T>(settings: QueueSettings) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = bounded(settings.capacity);
    (
        StageSender { tx, settings },
        StageReceiver { rx },
    )
}

/// Producer half of a stage boundary.
pub struct StageSender<T> {
    tx: Sender<StreamItem<T>>,
    settings: QueueSettings,
}

impl<T> Clone for StageSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            settings: self.settings,
        }
    }
}

impl<T> StageSender<T> {
    /// Enqueue a data record with backpressure.
    ///
    /// Blocks up to `send_timeout` per attempt; retries with a doubling
    /// backoff-derived timeout budget, then drops the record. Returns whether
    /// the record was enqueued. A `false` from a disconnected queue means the
    /// consumer is gone and the caller should stop producing.
    pub fn send_record(&self, stage: &'static str, record: T) -> SendOutcome {
        let mut item = StreamItem::Record(record);
        let mut timeout = self.settings.send_timeout;
        for attempt in 0..=self.settings.retries {
            match self.tx.send_timeout(item, timeout) {
                Ok(()) => return SendOutcome::Sent,
                Err(crossbeam_channel::SendTimeoutError::Timeout(returned)) => {
                    debug!(stage, attempt, "queue full, retrying enqueue");
                    item = returned;
                    timeout *= 2;
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return SendOutcome::Disconnected;
                }
            }
        }
        warn!(stage, "queue full after retries, dropping record");
        SendOutcome::Dropped
    }

    /// Forward the end-of-stream marker. Blocking: the sentinel must reach
    /// the consumer for shutdown to propagate. A disconnected consumer has
    /// already terminated, which satisfies the same guarantee.
    pub fn send_eos(&self) {
        if self.tx.send(StreamItem::EndOfStream).is_err() {
            debug!("eos not delivered, consumer already gone");
        }
    }

    /// Non-blocking send, used by tests to fill a queue to capacity.
    #[cfg(test)]
    pub fn try_send_record(&self, record: T) -> bool {
        self.tx.try_send(StreamItem::Record(record)).is_ok()
    }
}

/// Result of a backpressured enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Queue stayed full through every retry; record was dropped.
    Dropped,
    /// Consumer terminated; no point producing further.
    Disconnected,
}

/// Consumer half of a stage boundary.
pub struct StageReceiver<T> {
    rx: Receiver<StreamItem<T>>,
}

impl<T> StageReceiver<T> {
    /// Dequeue with timeout. The only suspension point of a consuming stage.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<StreamItem<T>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// One final non-blocking drain after the sentinel, catching records that
    /// raced it into the queue. Returns the number of leftover data records.
    pub fn drain(&self, mut handle: impl FnMut(T)) -> usize {
        let mut leftover = 0;
        while let Ok(item) = self.rx.try_recv() {
            if let StreamItem::Record(record) = item {
                handle(record);
                leftover += 1;
            }
        }
        leftover
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_settings() -> QueueSettings {
        QueueSettings {
            capacity: 2,
            send_timeout: Duration::from_millis(5),
            retries: 1,
        }
    }

    #[test]
    fn test_send_and_receive_order() {
        let (tx, rx) = stage_queue::<u32>(tiny_settings());
        assert_eq!(tx.send_record("test", 1), SendOutcome::Sent);
        assert_eq!(tx.send_record("test", 2), SendOutcome::Sent);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap(),
            StreamItem::Record(1)
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap(),
            StreamItem::Record(2)
        );
    }

    #[test]
    fn test_full_queue_drops_after_retries() {
        let (tx, _rx) = stage_queue::<u32>(tiny_settings());
        assert!(tx.try_send_record(1));
        assert!(tx.try_send_record(2));
        // Nobody consumes, so the bounded retries expire and the record drops.
        assert_eq!(tx.send_record("test", 3), SendOutcome::Dropped);
    }

    #[test]
    fn test_disconnected_consumer_reported() {
        let (tx, rx) = stage_queue::<u32>(tiny_settings());
        drop(rx);
        assert_eq!(tx.send_record("test", 1), SendOutcome::Disconnected);
    }

    #[test]
    fn test_drain_skips_eos_counts_records() {
        let (tx, rx) = stage_queue::<u32>(QueueSettings {
            capacity: 8,
            ..tiny_settings()
        });
        tx.send_record("test", 1);
        tx.send_eos();
        tx.send_record("test", 2);
        // Consume up to the sentinel as a worker loop would.
        loop {
            match rx.recv_timeout(Duration::from_millis(10)).unwrap() {
                StreamItem::EndOfStream => break,
                StreamItem::Record(_) => {}
            }
        }
        let mut drained = Vec::new();
        assert_eq!(rx.drain(|r| drained.push(r)), 1);
        assert_eq!(drained, vec![2]);
    }
}
