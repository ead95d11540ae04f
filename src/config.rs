//! Configuration management
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (metadata.toml)
//! - Environment variables (METADATA__*)
//!
//! ## Example config file (metadata.toml):
//! ```toml
//! [store]
//! operation_timeout_secs = 30
//! max_conflict_retries = 16
//! snapshot_path = "./metadata-store.json"
//!
//! [workers]
//! threads = 4
//! thread_name = "metadata-worker"
//!
//! [schema]
//! default_compatibility_strategy = "FULL"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::compatibility::SchemaCompatibilityStrategy;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Resource store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Shared worker pool
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Schema registry settings
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Resource store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deadline for the blocking form of every operation
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Extra read-modify-write cycles after a conflicting write; 0 means one attempt
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Where the CLI keeps the in-memory store between runs
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

/// Schema registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Strategy applied when a request resolves to `UNDEFINED`
    #[serde(default = "default_strategy")]
    pub default_compatibility_strategy: SchemaCompatibilityStrategy,
}

// Default value functions
fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_max_conflict_retries() -> u32 {
    16
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("metadata-store.json")
}

fn default_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    "metadata-worker".to_string()
}

fn default_strategy() -> SchemaCompatibilityStrategy {
    SchemaCompatibilityStrategy::Full
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout_secs(),
            max_conflict_retries: default_max_conflict_retries(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            thread_name: default_thread_name(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            default_compatibility_strategy: default_strategy(),
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl MetadataConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["metadata.toml", ".metadata.toml", "config/metadata.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "broker-metadata") {
            let xdg_config = config_dir.config_dir().join("metadata.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (METADATA__STORE__MAX_CONFLICT_RETRIES, ...)
        builder = builder.add_source(
            Environment::with_prefix("METADATA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
