//! Manager configuration.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Attempts before a contested update gives up
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,

    /// TTL of the directory lease
    #[serde(default = "default_directory_lease_ttl", with = "humantime_serde")]
    pub directory_lease_ttl: Duration,

    /// How long to wait for the directory lease
    #[serde(default = "default_lease_wait", with = "humantime_serde")]
    pub lease_wait: Duration,

    /// Pause between lease attempts
    #[serde(default = "default_lease_retry_interval", with = "humantime_serde")]
    pub lease_retry_interval: Duration,

    /// Expiry of cached account records
    #[serde(default = "default_account_cache_ttl", with = "humantime_serde")]
    pub account_cache_ttl: Duration,

    /// How long a deleted login keeps its uuid for re-registration
    #[serde(default = "default_deleted_account_retention", with = "humantime_serde")]
    pub deleted_account_retention: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_update_attempts: default_max_update_attempts(),
            directory_lease_ttl: default_directory_lease_ttl(),
            lease_wait: default_lease_wait(),
            lease_retry_interval: default_lease_retry_interval(),
            account_cache_ttl: default_account_cache_ttl(),
            deleted_account_retention: default_deleted_account_retention(),
        }
    }
}

fn default_max_update_attempts() -> u32 {
    10
}

fn default_directory_lease_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_lease_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_lease_retry_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_account_cache_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_deleted_account_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}
