use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub threat: ThreatConfig,

    #[serde(default)]
    pub preprocessor: PreprocessorConfig,

    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub correlator: CorrelatorConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/flowsentry/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("flowsentry/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for report files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the classifier model artifact (JSON)
    #[serde(default = "default_model_path")]
    pub path: PathBuf,

    /// The designated "not an attack" class label
    #[serde(default = "default_benign_label")]
    pub benign_label: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            benign_label: default_benign_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    /// Minimum runner-up confidence for a YELLOW alert
    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: f32,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            suspicion_threshold: default_suspicion_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Records per micro-batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum wait since the batch became non-empty before flushing (ms)
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl PreprocessorConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of every stage boundary queue
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Enqueue timeout in live mode (long-lived, sparse arrivals) (ms)
    #[serde(default = "default_live_timeout_ms")]
    pub live_timeout_ms: u64,

    /// Enqueue timeout in batch mode (finite, fast-draining) (ms)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Bounded enqueue retries before log-and-drop
    #[serde(default = "default_enqueue_retries")]
    pub enqueue_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            live_timeout_ms: default_live_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            enqueue_retries: default_enqueue_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// strftime format keying live report files by minute-of-day
    #[serde(default = "default_minute_format")]
    pub minute_format: String,

    /// Flush the live report file to storage every N rows
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            minute_format: default_minute_format(),
            flush_every: default_flush_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Enable attack report correlation
    #[serde(default)]
    pub enabled: bool,

    /// Per-class training-corpus feature distributions (JSON); absence
    /// disables the distribution comparison but not the campaign log
    #[serde(default)]
    pub baseline_path: Option<PathBuf>,

    /// Z-score above which a live feature mean counts as diverged
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f32,

    /// Log campaign/divergence state every N attack observations
    #[serde(default = "default_correlator_log_interval")]
    pub log_interval: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            baseline_path: None,
            zscore_threshold: default_zscore_threshold(),
            log_interval: default_correlator_log_interval(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/var/lib/flowsentry/reports")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("/var/lib/flowsentry/model.json")
}

fn default_benign_label() -> String {
    "Benign".to_string()
}

fn default_suspicion_threshold() -> f32 {
    0.25
}

fn default_batch_size() -> usize {
    50
}

fn default_max_wait_ms() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_live_timeout_ms() -> u64 {
    5000
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_enqueue_retries() -> u32 {
    3
}

fn default_minute_format() -> String {
    "%H%M".to_string()
}

fn default_flush_every() -> usize {
    20
}

fn default_zscore_threshold() -> f32 {
    3.0
}

fn default_correlator_log_interval() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.benign_label, "Benign");
        assert_eq!(config.threat.suspicion_threshold, 0.25);
        assert_eq!(config.preprocessor.batch_size, 50);
        assert!(config.queues.batch_timeout_ms < config.queues.live_timeout_ms);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.benign_label, config.model.benign_label);
        assert_eq!(parsed.report.minute_format, config.report.minute_format);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("[threat]\nsuspicion_threshold = 0.4\n").unwrap();
        assert_eq!(parsed.threat.suspicion_threshold, 0.4);
        assert_eq!(parsed.preprocessor.batch_size, 50);
    }
}
