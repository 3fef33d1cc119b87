//! Flow sources
//!
//! The flow source is the pipeline's upstream collaborator: it yields typed
//! [`RawFlow`] records one at a time. Records that fail the closed schema are
//! rejected here, at the boundary, with a logged reason; the pipeline never
//! sees them. Sources are polled with a timeout so the engine can observe its
//! stop flag between records even when the stream is quiet; exhaustion
//! (batch) or a stop signal (live) makes the engine emit the end-of-stream
//! marker downstream.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use crate::core::flow::RawFlow;

/// Outcome of one source poll.
pub enum SourcePoll {
    /// A well-formed record.
    Flow(RawFlow),
    /// Nothing arrived within the timeout; the stream is still open.
    Idle,
    /// The stream has ended.
    Exhausted,
}

/// A stream of raw flow records.
pub trait FlowSource: Send {
    /// Wait up to `timeout` for the next well-formed record. Replay sources
    /// never report `Idle`; live sources do, so the caller can check its stop
    /// flag between records. Malformed records are rejected internally and
    /// never surfaced.
    fn poll_flow(&mut self, timeout: Duration) -> SourcePoll;

    /// Records yielded so far.
    fn records_read(&self) -> u64;

    /// Records rejected at the schema boundary so far.
    fn records_rejected(&self) -> u64;
}

/// Batch-mode source: replays a recorded CSV flow set (CICFlowMeter export).
pub struct CsvReplaySource {
    reader: csv::DeserializeRecordsIntoIter<File, RawFlow>,
    read: u64,
    rejected: u64,
}

impl CsvReplaySource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open flow set: {}", path.as_ref().display()))?;
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file)
            .into_deserialize();
        Ok(Self {
            reader,
            read: 0,
            rejected: 0,
        })
    }
}

impl FlowSource for CsvReplaySource {
    fn poll_flow(&mut self, _timeout: Duration) -> SourcePoll {
        for record in self.reader.by_ref() {
            match record {
                Ok(flow) => {
                    self.read += 1;
                    return SourcePoll::Flow(flow);
                }
                Err(e) => {
                    self.rejected += 1;
                    warn!("rejected flow record at source boundary: {}", e);
                }
            }
        }
        debug!(read = self.read, rejected = self.rejected, "flow set exhausted");
        SourcePoll::Exhausted
    }

    fn records_read(&self) -> u64 {
        self.read
    }

    fn records_rejected(&self) -> u64 {
        self.rejected
    }
}

/// Capacity of the feeder channel between the decode thread and the poller.
const FEED_CAPACITY: usize = 256;

/// Live-mode source: newline-delimited JSON flow records from a reader
/// (normally the stdout of an external flow exporter piped to us).
///
/// Lines are read and decoded on a feeder thread and handed over through a
/// bounded channel, so `poll_flow` is a timed wait rather than a blocking
/// read and a quiet stream cannot starve the caller's stop-flag check. The
/// bounded channel also pushes back on the feeder when the pipeline is slow.
pub struct JsonLinesSource {
    rx: Receiver<RawFlow>,
    read: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl JsonLinesSource {
    pub fn spawn<R: BufRead + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = bounded(FEED_CAPACITY);
        let read = Arc::new(AtomicU64::new(0));
        let rejected = Arc::new(AtomicU64::new(0));

        let feeder_read = read.clone();
        let feeder_rejected = rejected.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RawFlow>(trimmed) {
                            Ok(flow) => {
                                feeder_read.fetch_add(1, Ordering::Relaxed);
                                // Receiver gone means the session is over.
                                if tx.send(flow).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                feeder_rejected.fetch_add(1, Ordering::Relaxed);
                                warn!("rejected flow record at source boundary: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("flow source read error, ending stream: {}", e);
                        break;
                    }
                }
            }
            debug!("flow stream feeder stopped");
        });

        Self { rx, read, rejected }
    }

    pub fn stdin() -> Self {
        Self::spawn(BufReader::new(std::io::stdin()))
    }
}

impl FlowSource for JsonLinesSource {
    fn poll_flow(&mut self, timeout: Duration) -> SourcePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(flow) => SourcePoll::Flow(flow),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Exhausted,
        }
    }

    fn records_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    fn records_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// In-memory source for tests and replays of pre-built record sets.
pub struct VecSource {
    flows: std::vec::IntoIter<RawFlow>,
    read: u64,
}

impl VecSource {
    pub fn new(flows: Vec<RawFlow>) -> Self {
        Self {
            flows: flows.into_iter(),
            read: 0,
        }
    }
}

impl FlowSource for VecSource {
    fn poll_flow(&mut self, _timeout: Duration) -> SourcePoll {
        match self.flows.next() {
            Some(flow) => {
                self.read += 1;
                SourcePoll::Flow(flow)
            }
            None => SourcePoll::Exhausted,
        }
    }

    fn records_read(&self) -> u64 {
        self.read
    }

    fn records_rejected(&self) -> u64 {
        0
    }
}
