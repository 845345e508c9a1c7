//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `tessera-config.yaml`. Every field
//! has a default, so an empty file (or no file at all) yields a working
//! in-memory setup listening on `127.0.0.1:34198`.
//!
//! ```yaml
//! hub:
//!   bind_addr: "127.0.0.1:34198"
//! engine:
//!   queue_capacity: 4096
//!   sequence_scope: global      # or per_topic
//!   chunk_size: 32
//! store:
//!   url: "sqlite://world.db"
//! snapshots:
//!   root: "./snapshots"
//! logging:
//!   level: info
//!   format: json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tessera_hub::HubConfig;
use tessera_store::StoreConfig;

use crate::sequence::SequenceScope;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Event hub socket settings.
    #[serde(default)]
    pub hub: HubSettings,

    /// Ingestion engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// World store connection.
    #[serde(default)]
    pub store: DatabaseConfig,

    /// Snapshot file locations.
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// - `TESSERA_BIND_ADDR` overrides `hub.bind_addr`
    /// - `TESSERA_DATABASE_URL` overrides `store.url`
    /// - `TESSERA_SNAPSHOT_ROOT` overrides `snapshots.root`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults (with environment overrides applied).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_raw(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse without consulting the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_raw(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override connection settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TESSERA_BIND_ADDR") {
            self.hub.bind_addr = val;
        }
        if let Ok(val) = std::env::var("TESSERA_DATABASE_URL") {
            self.store.url = val;
        }
        if let Ok(val) = std::env::var("TESSERA_SNAPSHOT_ROOT") {
            self.snapshots.root = PathBuf::from(val);
        }
    }
}

/// Event hub socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubSettings {
    /// UDP address to bind.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Receive buffer size in bytes.
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,

    /// Socket read timeout in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long shutdown waits for the listener thread, in milliseconds.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl HubSettings {
    /// Socket settings for [`tessera_hub::EventHub::bind`].
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            bind_addr: self.bind_addr.clone(),
            max_datagram_bytes: self.max_datagram_bytes,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_datagram_bytes: default_max_datagram_bytes(),
            read_timeout_ms: default_read_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

/// Ingestion engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Bound of the ingestion queue. Pushes beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Whether sequence numbers are tracked globally or per event type.
    #[serde(default)]
    pub sequence_scope: SequenceScope,

    /// Chunk edge length in tiles.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Default `ensure_synced` budget in milliseconds.
    #[serde(default = "default_sync_timeout_ms")]
    pub default_sync_timeout_ms: u64,

    /// Interval of the pending-chunk sweep in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl EngineConfig {
    /// Default `ensure_synced` budget.
    pub const fn default_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.default_sync_timeout_ms)
    }

    /// Interval of the pending-chunk sweep.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sequence_scope: SequenceScope::default(),
            chunk_size: default_chunk_size(),
            default_sync_timeout_ms: default_sync_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// World store connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `SQLite` URL.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Pool size for file-backed databases. In-memory stores always use one.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Pool settings for [`tessera_store::WorldStore::connect`].
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.url).with_max_connections(self.max_connections)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Snapshot file locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding one `<x>_<y>` subdirectory per chunk.
    #[serde(default = "default_snapshot_root")]
    pub root: PathBuf,

    /// File name of the per-chunk updates log.
    #[serde(default = "default_updates_file")]
    pub updates_file: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            root: default_snapshot_root(),
            updates_file: default_updates_file(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_bind_addr() -> String {
    "127.0.0.1:34198".to_owned()
}

const fn default_max_datagram_bytes() -> usize {
    tessera_hub::MAX_DATAGRAM_BYTES
}

const fn default_read_timeout_ms() -> u64 {
    100
}

const fn default_stop_timeout_ms() -> u64 {
    1000
}

const fn default_queue_capacity() -> usize {
    4096
}

const fn default_chunk_size() -> u32 {
    32
}

const fn default_sync_timeout_ms() -> u64 {
    5000
}

const fn default_sweep_interval_ms() -> u64 {
    2000
}

fn default_store_url() -> String {
    tessera_store::MEMORY_URL.to_owned()
}

const fn default_max_connections() -> u32 {
    4
}

fn default_snapshot_root() -> PathBuf {
    PathBuf::from("./snapshots")
}

fn default_updates_file() -> String {
    "updates.jsonl".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = SyncConfig::default();
        assert_eq!(config.hub.bind_addr, "127.0.0.1:34198");
        assert_eq!(config.hub.max_datagram_bytes, 65_507);
        assert_eq!(config.engine.queue_capacity, 4096);
        assert_eq!(config.engine.chunk_size, 32);
        assert_eq!(config.engine.sequence_scope, SequenceScope::Global);
        assert_eq!(config.store.url, "sqlite::memory:");
        assert_eq!(config.snapshots.updates_file, "updates.jsonl");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(SyncConfig::parse_raw("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r#"
hub:
  bind_addr: "0.0.0.0:40000"
  read_timeout_ms: 50
engine:
  sequence_scope: per_topic
  queue_capacity: 16
snapshots:
  root: "/var/lib/tessera/snapshots"
logging:
  format: json
"#;
        let config = SyncConfig::parse_raw(yaml).unwrap();
        assert_eq!(config.hub.bind_addr, "0.0.0.0:40000");
        assert_eq!(config.hub.stop_timeout_ms, 1000);
        assert_eq!(config.engine.sequence_scope, SequenceScope::PerTopic);
        assert_eq!(config.engine.queue_capacity, 16);
        assert_eq!(config.engine.chunk_size, 32);
        assert_eq!(config.snapshots.root, PathBuf::from("/var/lib/tessera/snapshots"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(
            SyncConfig::parse_raw("engine: [not, a, map]"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn section_conversions() {
        let config = SyncConfig::default();
        let hub = config.hub.to_hub_config();
        assert_eq!(hub.read_timeout, Duration::from_millis(100));
        assert!(config.store.to_store_config().is_memory());
        assert_eq!(config.engine.sweep_interval(), Duration::from_secs(2));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = SyncConfig::load_or_default(Path::new("/nonexistent/tessera.yaml")).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
    }
}
