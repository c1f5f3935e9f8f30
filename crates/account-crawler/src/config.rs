//! Crawler and listener configuration.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Accounts read per tick
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between ticks
    #[serde(default = "default_chunk_interval", with = "humantime_serde")]
    pub chunk_interval: Duration,

    /// Pause between ticks while acceleration is requested
    #[serde(default = "default_accelerated_interval", with = "humantime_serde")]
    pub accelerated_interval: Duration,

    /// Pause after a failed tick
    #[serde(default = "default_error_backoff", with = "humantime_serde")]
    pub error_backoff: Duration,

    /// TTL of the crawl lease
    #[serde(default = "default_lease_ttl", with = "humantime_serde")]
    pub lease_ttl: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Inactivity after which an account is deleted
    #[serde(default = "default_max_idle", with = "humantime_serde")]
    pub max_idle: Duration,

    #[serde(default = "default_max_deletions_per_chunk")]
    pub max_deletions_per_chunk: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushFeedbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long an uninstall report must stand before tokens are dropped
    #[serde(default = "default_feedback_grace", with = "humantime_serde")]
    pub feedback_grace: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_interval: default_chunk_interval(),
            accelerated_interval: default_accelerated_interval(),
            error_backoff: default_error_backoff(),
            lease_ttl: default_lease_ttl(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_idle: default_max_idle(),
            max_deletions_per_chunk: default_max_deletions_per_chunk(),
        }
    }
}

impl Default for PushFeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            feedback_grace: default_feedback_grace(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_interval() -> Duration {
    Duration::from_secs(8)
}

fn default_accelerated_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_max_idle() -> Duration {
    Duration::from_secs(180 * 24 * 60 * 60)
}

fn default_max_deletions_per_chunk() -> usize {
    40
}

fn default_feedback_grace() -> Duration {
    Duration::from_secs(2 * 24 * 60 * 60)
}
