//! Configuration for the account service.

use account_crawler::{CrawlerConfig, PushFeedbackConfig, ReaperConfig};
use accounts::ManagerConfig;
use anyhow::{Context, Result};
use directory::DirectoryConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Cluster cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Account store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Directory diff configuration
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Account manager configuration
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Crawler configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Stale account reaper configuration
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Push feedback configuration
    #[serde(default)]
    pub push_feedback: PushFeedbackConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How often expired cache entries are swept
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Enable persistence (if false, accounts are in-memory only)
    #[serde(default)]
    pub persist: bool,

    /// Path to the encrypted account snapshot
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Base64 32-byte snapshot key
    #[serde(default)]
    pub snapshot_key: Option<SecretString>,

    /// Passphrase the snapshot key is derived from, used without a key
    #[serde(default)]
    pub snapshot_passphrase: Option<SecretString>,

    /// Snapshot of a second store to mirror writes into while migrating
    #[serde(default)]
    pub shadow_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

// Default implementations
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist: false,
            snapshot_path: default_snapshot_path(),
            snapshot_key: None,
            snapshot_passphrase: None,
            shadow_path: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/data/accounts.enc")
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
