//! Configuration loading for the waypoint CLI.
//!
//! Configuration is loaded from a TOML file (default: `waypoint.toml` in the
//! data directory). Every field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sync_client::{ConversationConfig, CounterStrategy, MergePolicy, SyncConfig};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "waypoint.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local cache configuration.
    pub cache: CacheConfig,
    /// Remote store configuration.
    pub remote: RemoteConfig,
    /// Sync engine configuration.
    pub sync: EngineConfig,
    /// Conversation configuration.
    pub conversations: ConversationsConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Local cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file, relative to the data directory.
    pub database: PathBuf,
}

/// Remote store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// JSON snapshot backing the remote, relative to the data directory.
    pub snapshot: PathBuf,
}

/// Sync engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `replace` (default) or `upsert`.
    pub merge_policy: MergePolicy,
}

/// Conversation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationsConfig {
    /// How unread counters are written.
    pub counter_strategy: StrategyName,
    /// Attempts for `optimistic_retry`.
    pub max_attempts: u32,
}

/// Counter strategy as spelled in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    /// Unconditional read-modify-write.
    ReadModifyWrite,
    /// Server-side atomic increment.
    AtomicIncrement,
    /// Versioned compare-and-set with retries.
    #[default]
    OptimisticRetry,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub filter: String,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("cache.db")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("remote.json")
}

fn default_max_attempts() -> u32 {
    sync_client::DEFAULT_MAX_ATTEMPTS
}

fn default_log_filter() -> String {
    "warn".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot_path(),
        }
    }
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            counter_strategy: StrategyName::default(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if given, else `waypoint.toml` in the data directory if
    /// present, else defaults.
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Absolute cache database path.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.cache.database)
    }

    /// Absolute remote snapshot path.
    pub fn snapshot_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.remote.snapshot)
    }

    /// Engine configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default().with_merge_policy(self.sync.merge_policy)
    }

    /// Conversation manager configuration.
    pub fn conversation_config(&self) -> ConversationConfig {
        let strategy = match self.conversations.counter_strategy {
            StrategyName::ReadModifyWrite => CounterStrategy::ReadModifyWrite,
            StrategyName::AtomicIncrement => CounterStrategy::AtomicIncrement,
            StrategyName::OptimisticRetry => CounterStrategy::OptimisticRetry {
                max_attempts: self.conversations.max_attempts,
            },
        };
        ConversationConfig::default().with_counter_strategy(strategy)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to render config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}
