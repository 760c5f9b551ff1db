//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/board_ingest.toml` by default)
//! 2. environment variables prefixed with `BOARD_INGEST_`, nested keys separated by `__`
//!
//! Every tunable has a serde default, so a file holding only `[[boards]]` is enough.
//!
//! # Example
//! ```no_run
//! use board_ingest::config::IngestConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use crate::connection::{BoardEndpoint, ClockSource, ConnectionTimings};
use crate::error::{IngestError, IngestResult};
use crate::ingest::{ResampleConfig, WorkerConfig, DEFAULT_DEDUP_CAPACITY};
use crate::sample::SignalId;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/board_ingest.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Board endpoints, tried by index.
    #[serde(default)]
    pub boards: Vec<BoardEndpoint>,
    /// Connection timers and clock
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Dedup and resampling settings
    #[serde(default)]
    pub ingest: IngestSettings,
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Board channel number (as a string key) to signal name. Unmapped channels are
    /// named `ch<N>`.
    #[serde(default)]
    pub signals: BTreeMap<String, String>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Socket and timer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Handshake deadline in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Idle time in ms before the socket is destroyed
    #[serde(default = "default_watchdog")]
    pub watchdog_ms: u64,
    /// Delay in ms before reconnecting
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
    /// Pause between frames of a command sequence.
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,
    /// Socket read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Clock used for history and live updates
    #[serde(default)]
    pub clock_source: ClockSource,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            watchdog_ms: default_watchdog(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            send_interval_ms: default_send_interval(),
            read_buffer_size: default_read_buffer_size(),
            clock_source: ClockSource::default(),
        }
    }
}

/// Deduplication and resampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Keys remembered before the dedup set resets
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Bursts up to this length use the rounded-step layout
    #[serde(default = "default_small_burst_threshold")]
    pub small_burst_threshold: usize,
    /// Sample count large bursts are padded to
    #[serde(default = "default_large_burst_target")]
    pub large_burst_target: usize,
    /// Anchor advance between batches in ms
    #[serde(default = "default_anchor_increment")]
    pub anchor_increment_ms: i64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            small_burst_threshold: default_small_burst_threshold(),
            large_burst_target: default_large_burst_target(),
            anchor_increment_ms: default_anchor_increment(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Keep rows in memory (testing and dry runs).
    #[default]
    Memory,
    /// Append rows to a session CSV file in `output_dir`.
    Csv,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where samples are written
    #[serde(default)]
    pub backend: StorageBackend,
    /// Output directory for data files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Board Ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_watchdog() -> u64 {
    2000
}

fn default_reconnect_backoff() -> u64 {
    1000
}

fn default_send_interval() -> u64 {
    1000
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

fn default_small_burst_threshold() -> usize {
    500
}

fn default_large_burst_target() -> usize {
    1000
}

fn default_anchor_increment() -> i64 {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl IngestConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `BOARD_INGEST_CONNECTION__WATCHDOG_MS=5000`.
    pub fn load() -> IngestResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BOARD_INGEST_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> IngestResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if self.boards.is_empty() {
            return Err(invalid("At least one [[boards]] entry is required".to_string()));
        }
        for (index, board) in self.boards.iter().enumerate() {
            if board.host.trim().is_empty() {
                return Err(invalid(format!("Board {index} has an empty host")));
            }
            if board.port == 0 {
                return Err(invalid(format!("Board {index} ({}) has port 0", board.host)));
            }
        }

        let conn = &self.connection;
        for (name, value) in [
            ("connect_timeout_ms", conn.connect_timeout_ms),
            ("watchdog_ms", conn.watchdog_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("connection.{name} must be greater than 0")));
            }
        }
        if conn.read_buffer_size == 0 {
            return Err(invalid("connection.read_buffer_size must be greater than 0".to_string()));
        }

        let ingest = &self.ingest;
        if ingest.dedup_capacity == 0 {
            return Err(invalid("ingest.dedup_capacity must be greater than 0".to_string()));
        }
        if ingest.small_burst_threshold >= ingest.large_burst_target {
            return Err(invalid(format!(
                "ingest.small_burst_threshold ({}) must be below large_burst_target ({})",
                ingest.small_burst_threshold, ingest.large_burst_target
            )));
        }

        let mut names = std::collections::HashSet::new();
        for (channel, name) in &self.signals {
            if channel.parse::<u16>().is_err() {
                return Err(invalid(format!("Signal key '{channel}' is not a channel number")));
            }
            if name.trim().is_empty() {
                return Err(invalid(format!("Signal name for channel {channel} is empty")));
            }
            if !names.insert(name.as_str()) {
                return Err(invalid(format!("Duplicate signal name: {name}")));
            }
        }

        Ok(())
    }

    /// Timer settings for the connection actor.
    pub fn connection_timings(&self) -> ConnectionTimings {
        ConnectionTimings {
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            watchdog: Duration::from_millis(self.connection.watchdog_ms),
            reconnect_backoff: Duration::from_millis(self.connection.reconnect_backoff_ms),
        }
    }

    /// Delay between frames of a command sequence
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.connection.send_interval_ms)
    }

    /// Settings for the ingestion worker.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            dedup_capacity: self.ingest.dedup_capacity,
            resample: ResampleConfig {
                small_burst_threshold: self.ingest.small_burst_threshold,
                large_burst_target: self.ingest.large_burst_target,
                anchor_increment_ms: self.ingest.anchor_increment_ms,
                ..ResampleConfig::default()
            },
        }
    }

    /// Channel-to-signal table for the payload decoder. Keys that are not channel numbers
    /// are skipped; `validate` reports them.
    pub fn signal_table(&self) -> HashMap<u16, SignalId> {
        self.signals
            .iter()
            .filter_map(|(channel, name)| Some((channel.parse().ok()?, SignalId::new(name))))
            .collect()
    }
}

fn invalid(message: String) -> IngestError {
    IngestError::Configuration(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> IngestConfig {
        IngestConfig {
            boards: vec![BoardEndpoint::new("127.0.0.1", 8080)],
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_board_list() {
        let config = IngestConfig::default();
        assert!(matches!(config.validate(), Err(IngestError::Configuration(_))));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid_config();
        config.boards.push(BoardEndpoint::new("10.0.0.3", 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_must_be_below_target() {
        let mut config = valid_config();
        config.ingest.small_burst_threshold = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_signal_names() {
        let mut config = valid_config();
        config.signals.insert("1".to_string(), "rpm".to_string());
        config.signals.insert("2".to_string(), "rpm".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_numeric_signal_key() {
        let mut config = valid_config();
        config.signals.insert("rpm".to_string(), "rpm".to_string());
        assert!(config.validate().is_err());
        assert!(config.signal_table().is_empty());
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[[boards]]
host = "192.168.1.10"
port = 8080

[[boards]]
host = "192.168.1.11"
port = 8080

[connection]
watchdog_ms = 3000
clock_source = "local"

[storage]
backend = "csv"

[signals]
"1" = "rpm"
"2" = "oil_temp"
"#
        )
        .unwrap();

        let config = IngestConfig::load_from(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.boards.len(), 2);
        assert_eq!(config.connection.watchdog_ms, 3000);
        assert_eq!(config.connection.connect_timeout_ms, 5000);
        assert_eq!(config.connection.clock_source, ClockSource::Local);
        assert_eq!(config.storage.backend, StorageBackend::Csv);
        assert_eq!(config.ingest.dedup_capacity, 100_000);

        let table = config.signal_table();
        assert_eq!(table.get(&2).map(SignalId::as_str), Some("oil_temp"));
    }

    #[test]
    fn test_derived_settings() {
        let config = valid_config();
        let timings = config.connection_timings();
        assert_eq!(timings, ConnectionTimings::default());

        let worker = config.worker_config();
        assert_eq!(worker.resample, ResampleConfig::default());
        assert_eq!(worker.dedup_capacity, 100_000);
        assert_eq!(config.send_interval(), Duration::from_millis(1000));
    }
}
