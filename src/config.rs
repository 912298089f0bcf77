//! Configuration types for pubsync
//!
//! Every field has a serde default so an empty document deserializes into a
//! working configuration. Durations are serialized as whole seconds.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the sync pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`sync`](SyncConfig) - pagination pacing, round scheduling, error threshold
/// - [`download`](DownloadConfig) - worker pool width and fetch timeout
/// - [`retry`](RetryConfig) - per-item retry and backoff
/// - [`export`](ExportConfig) - output directory and filename template
/// - [`persistence`](PersistenceConfig) - database path and checkpoint policy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sync pacing and round scheduling
    #[serde(default)]
    pub sync: SyncConfig,

    /// Payload download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for payload fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Data storage and checkpoint management
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(Error::config(
                "download.concurrency",
                "download concurrency must be at least 1",
            ));
        }
        if self.sync.max_consecutive_errors == 0 {
            return Err(Error::config(
                "sync.max_consecutive_errors",
                "consecutive error threshold must be at least 1",
            ));
        }
        if self.export.filename_template.trim().is_empty() {
            return Err(Error::config(
                "export.filename_template",
                "filename template must not be empty",
            ));
        }
        Ok(())
    }
}

/// Pagination pacing and round scheduling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay between successive page fetches of one account (default: 5 seconds)
    #[serde(default = "default_page_delay", with = "duration_serde")]
    pub page_delay: Duration,

    /// Delay between accounts within a round (default: 10 seconds)
    ///
    /// Skipped when an account needed no network calls.
    #[serde(default = "default_account_interval", with = "duration_serde")]
    pub account_interval: Duration,

    /// Delay after a completed round before the next one (default: 10 seconds)
    #[serde(default = "default_round_interval", with = "duration_serde")]
    pub round_interval: Duration,

    /// Delay before restarting a round that failed (default: 60 seconds)
    #[serde(default = "default_retry_interval", with = "duration_serde")]
    pub retry_interval: Duration,

    /// Round failures in a row before the pipeline pauses itself (default: 3)
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Messages requested per page on the public path (default: 5)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Items requested per page on the privileged path (default: 10)
    #[serde(default = "default_privileged_page_size")]
    pub privileged_page_size: u32,

    /// Only sync public-path items matching this keyword (default: none)
    #[serde(default)]
    pub keyword: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_delay: default_page_delay(),
            account_interval: default_account_interval(),
            round_interval: default_round_interval(),
            retry_interval: default_retry_interval(),
            max_consecutive_errors: default_max_consecutive_errors(),
            page_size: default_page_size(),
            privileged_page_size: default_privileged_page_size(),
            keyword: None,
        }
    }
}

/// Payload download behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of parallel download workers (default: 3)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for a single payload fetch (default: 30 seconds)
    ///
    /// A fetch that exceeds it is treated as a transient failure.
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Export settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Root directory for exported documents (default: "./export")
    #[serde(default = "default_export_dir")]
    pub directory: PathBuf,

    /// Output filename template
    ///
    /// Supported placeholders: `${YYYY}`, `${MM}`, `${DD}`, `${HH}`, `${mm}`
    /// (taken from the item's creation time) and `${title}` (sanitized).
    #[serde(default = "default_filename_template")]
    pub filename_template: String,

    /// File extension appended to every exported document (default: "md")
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Offset from UTC, in minutes, used for date placeholders (default: 0)
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_dir(),
            filename_template: default_filename_template(),
            extension: default_extension(),
            utc_offset_minutes: 0,
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "pubsync.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Checkpoints older than this are discarded at startup (default: 24 hours)
    #[serde(default = "default_checkpoint_max_age", with = "duration_serde")]
    pub checkpoint_max_age: Duration,

    /// Entries kept in the in-memory log tail (default: 100)
    #[serde(default = "default_log_tail_capacity")]
    pub log_tail_capacity: usize,

    /// Newest log entries written into each checkpoint (default: 20)
    #[serde(default = "default_persisted_log_entries")]
    pub persisted_log_entries: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            checkpoint_max_age: default_checkpoint_max_age(),
            log_tail_capacity: default_log_tail_capacity(),
            persisted_log_entries: default_persisted_log_entries(),
        }
    }
}

fn default_page_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_account_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_round_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_page_size() -> u32 {
    5
}

fn default_privileged_page_size() -> u32 {
    10
}

fn default_concurrency() -> usize {
    3
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_filename_template() -> String {
    "${YYYY}-${MM}-${DD} ${title}".to_string()
}

fn default_extension() -> String {
    "md".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pubsync.db")
}

fn default_checkpoint_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_log_tail_capacity() -> usize {
    100
}

fn default_persisted_log_entries() -> usize {
    20
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.sync.page_delay, Duration::from_secs(5));
        assert_eq!(config.sync.max_consecutive_errors, 3);
        assert_eq!(config.download.concurrency, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.export.extension, "md");
        assert_eq!(
            config.persistence.checkpoint_max_age,
            Duration::from_secs(86_400)
        );
        config.validate().unwrap();
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let json = r#"{"sync": {"page_delay": 2, "round_interval": 600}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.sync.page_delay, Duration::from_secs(2));
        assert_eq!(config.sync.round_interval, Duration::from_secs(600));
        assert_eq!(config.sync.account_interval, Duration::from_secs(10));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["sync"]["round_interval"], 600);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.download.concurrency = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("download.concurrency"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_error_threshold_and_blank_template() {
        let mut config = Config::default();
        config.sync.max_consecutive_errors = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.export.filename_template = "   ".to_string();
        assert!(config.validate().is_err());
    }
}
