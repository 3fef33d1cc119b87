//! Live-mode reporting: one file per calendar minute
//!
//! Rows are grouped by the wall-clock minute of their classification
//! timestamp. Crossing a minute boundary closes the open file with a footer
//! and opens the next one, named by minute-of-day. A session summary
//! aggregating every minute is written at end-of-stream.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ReportConfig;
use crate::core::result::{ClassificationResult, ThreatLevel};
use crate::pipeline::StatsSnapshot;

use super::{ReportSink, SessionTotals};

/// Counters for one minute window.
#[derive(Debug, Clone, Default)]
struct MinuteCounts {
    total: u64,
    red: u64,
    yellow: u64,
    green: u64,
    per_class: BTreeMap<String, u64>,
}

impl MinuteCounts {
    fn record(&mut self, class: &str, level: ThreatLevel) {
        self.total += 1;
        match level {
            ThreatLevel::Red => self.red += 1,
            ThreatLevel::Yellow => self.yellow += 1,
            ThreatLevel::Green => self.green += 1,
        }
        *self.per_class.entry(class.to_string()).or_default() += 1;
    }
}

/// The currently open minute file.
struct MinuteFile {
    key: String,
    path: PathBuf,
    writer: BufWriter<File>,
    counts: MinuteCounts,
    rows_since_flush: usize,
}

/// Closed-minute record kept for the session summary.
#[derive(Debug, Clone)]
struct MinuteSummary {
    key: String,
    counts: MinuteCounts,
}

/// Per-minute rotating report writer.
pub struct LiveReporter {
    dir: PathBuf,
    session_id: Uuid,
    started: DateTime<Utc>,
    minute_format: String,
    flush_every: usize,
    current: Option<MinuteFile>,
    closed: Vec<MinuteSummary>,
}

impl LiveReporter {
    pub fn new(dir: impl AsRef<Path>, cfg: &ReportConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        Ok(Self {
            dir,
            session_id: Uuid::new_v4(),
            started: Utc::now(),
            minute_format: cfg.minute_format.clone(),
            flush_every: cfg.flush_every.max(1),
            current: None,
            closed: Vec::new(),
        })
    }

    /// Minute key for a result timestamp, e.g. `1015` for 10:15:xx.
    fn minute_key(&self, ts: &DateTime<Utc>) -> String {
        ts.format(&self.minute_format).to_string()
    }

    fn open_minute(&self, key: &str, window_start: &DateTime<Utc>) -> Result<MinuteFile> {
        let path = self.dir.join(format!("flows-{}.log", key));
        let file = File::create(&path)
            .with_context(|| format!("Failed to open minute file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{:=<78}", "")?;
        writeln!(writer, "{:<14} {}", "session", self.session_id)?;
        writeln!(
            writer,
            "{:<14} {}",
            "started",
            self.started.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            writer,
            "{:<14} {} .. {}",
            "window",
            window_start.format("%H:%M:00"),
            window_start.format("%H:%M:59")
        )?;
        writeln!(writer, "{:=<78}", "")?;
        writeln!(
            writer,
            "{:<8} {:<44} {:<16} {:>6}  {}",
            "time", "flow", "class", "conf", "level"
        )?;
        writeln!(writer, "{:-<78}", "")?;

        debug!(path = %path.display(), "opened minute report file");
        Ok(MinuteFile {
            key: key.to_string(),
            path,
            writer,
            counts: MinuteCounts::default(),
            rows_since_flush: 0,
        })
    }

    fn close_minute(&mut self, mut file: MinuteFile) -> Result<()> {
        let outcome = Self::write_footer(&mut file);
        debug!(path = %file.path.display(), rows = file.counts.total, "closed minute report file");
        // The session summary keeps the minute even if its footer failed.
        self.closed.push(MinuteSummary {
            key: file.key,
            counts: file.counts,
        });
        outcome
    }

    fn write_footer(file: &mut MinuteFile) -> Result<()> {
        let c = &file.counts;
        writeln!(file.writer, "{:-<78}", "")?;
        writeln!(
            file.writer,
            "total {}  threat {}  suspicious {}  clean {}",
            c.total, c.red, c.yellow, c.green
        )?;
        for (class, count) in &c.per_class {
            writeln!(file.writer, "  {:<24} {}", class, count)?;
        }
        file.writer.flush()?;
        Ok(())
    }

    fn write_row(
        file: &mut MinuteFile,
        result: &ClassificationResult,
        level: ThreatLevel,
        flush_every: usize,
    ) -> Result<()> {
        let predicted = result.predicted();
        writeln!(
            file.writer,
            "{:<8} {:<44} {:<16} {:>5.1}%  {}",
            result.timestamp.format("%H:%M:%S"),
            result.id.to_string(),
            predicted.class,
            predicted.confidence * 100.0,
            level
        )?;
        file.counts.record(&predicted.class, level);
        file.rows_since_flush += 1;
        // Flushed periodically, not per row.
        if file.rows_since_flush >= flush_every {
            file.writer.flush()?;
            file.rows_since_flush = 0;
        }
        Ok(())
    }

    fn write_session_summary(
        &self,
        totals: &SessionTotals,
        pipeline: &StatsSnapshot,
    ) -> Result<PathBuf> {
        let path = self.dir.join(format!("session-{}.summary", self.session_id));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create session summary {}", path.display()))?;
        let mut w = BufWriter::new(file);

        writeln!(w, "{:=<78}", "")?;
        writeln!(w, "{:<14} {}", "session", self.session_id)?;
        writeln!(
            w,
            "{:<14} {}",
            "started",
            self.started.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            w,
            "{:<14} {}",
            "finished",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(w, "{:=<78}", "")?;
        writeln!(
            w,
            "input {}  processed {}  schema-drops {}  inference-drops {}  queue-drops {}",
            pipeline.flows_in,
            totals.total,
            pipeline.schema_drops,
            pipeline.inference_drops,
            pipeline.queue_drops
        )?;
        writeln!(
            w,
            "threat {}  suspicious {}  clean {}",
            totals.red, totals.yellow, totals.green
        )?;
        writeln!(w, "{:-<78}", "")?;
        writeln!(w, "{:<8} {:>8} {:>8} {:>8} {:>8}", "minute", "total", "red", "yellow", "green")?;
        for minute in &self.closed {
            writeln!(
                w,
                "{:<8} {:>8} {:>8} {:>8} {:>8}",
                minute.key,
                minute.counts.total,
                minute.counts.red,
                minute.counts.yellow,
                minute.counts.green
            )?;
        }
        writeln!(w, "{:-<78}", "")?;
        for (class, count) in &totals.per_class {
            writeln!(w, "  {:<24} {}", class, count)?;
        }
        w.flush()?;
        Ok(path)
    }
}

impl ReportSink for LiveReporter {
    fn record(&mut self, result: &ClassificationResult, level: ThreatLevel) -> Result<()> {
        let key = self.minute_key(&result.timestamp);

        let rotate = match &self.current {
            Some(file) => file.key != key,
            None => true,
        };
        if rotate {
            if let Some(previous) = self.current.take() {
                self.close_minute(previous)?;
            }
            self.current = Some(self.open_minute(&key, &result.timestamp)?);
        }

        let flush_every = self.flush_every;
        if let Some(file) = self.current.as_mut() {
            Self::write_row(file, result, level, flush_every)?;
        }
        Ok(())
    }

    fn finalize(&mut self, totals: &SessionTotals, pipeline: &StatsSnapshot) -> Result<()> {
        if let Some(file) = self.current.take() {
            self.close_minute(file)?;
        }
        let path = self.write_session_summary(totals, pipeline)?;
        info!(path = %path.display(), minutes = self.closed.len(), "session summary written");
        Ok(())
    }
}
