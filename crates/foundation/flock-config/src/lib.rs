//! # Flock Config
//!
//! YAML configuration with sensible defaults. Every section may be omitted.
//!
//! ```yaml
//! feed:
//!   page_size: 10
//!   chunk_size: 10
//! store:
//!   call_timeout_ms: 10000
//!   transaction_max_attempts: 5
//!   retry_backoff_ms: 20
//! mongodb:
//!   uri: mongodb://localhost:27017
//!   database: flock
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub mongodb: MongoConfig,
}

/// Feed pagination sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Posts per page
    pub page_size: usize,
    /// Max ids per "any of" sub-query
    pub chunk_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            chunk_size: 10,
        }
    }
}

/// Backing store call behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound for a single store call
    pub call_timeout_ms: u64,
    /// Attempts before a transaction conflict is surfaced
    pub transaction_max_attempts: u32,
    /// Base backoff between transaction attempts (jittered)
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            transaction_max_attempts: 5,
            retry_backoff_ms: 20,
        }
    }
}

impl StoreConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// MongoDB connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub users_collection: String,
    pub posts_collection: String,
    pub comments_collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".into(),
            database: "flock".into(),
            users_collection: "users".into(),
            posts_collection: "posts".into(),
            comments_collection: "comments".into(),
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/flock/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flock")
            .join("config.yaml")
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    /// Load from a specific file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&content)?;
        tracing::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to a file, creating parent directories
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "feed.page_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.feed.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "feed.chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.store.transaction_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "store.transaction_max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.store.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "store.call_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
