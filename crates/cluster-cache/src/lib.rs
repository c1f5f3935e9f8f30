//! Clustered key-value cache shared by every service instance.
//!
//! Cached accounts, the contact-discovery directory mirror and the crawler's
//! cursor and leases all live behind [`ClusterCache`]. Nothing stored here is
//! authoritative: callers treat [`CacheError::Unavailable`] as a miss or a
//! no-op and fall back to the durable account store.

mod error;
mod lease;
mod memory;

pub use error::CacheError;
pub use lease::{worker_id, Lease, LeaseGuard};
pub use memory::MemoryCache;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Operations the cluster cache exposes.
///
/// Scalar keys and hash keys share one namespace; using a scalar operation
/// on a hash key (or the reverse) fails with [`CacheError::WrongType`].
#[async_trait]
pub trait ClusterCache: Send + Sync {
    /// Read a scalar key.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a scalar key, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write a scalar key only if it is absent. Returns whether it was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Delete a key of any type. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete a scalar key only if it currently holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    /// Read one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    /// Write one field of a hash, creating the hash if needed.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    /// Delete one field of a hash. Returns whether it existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError>;

    /// Read a whole hash. A missing key reads as an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Replace a whole hash in one step. An empty map deletes the key.
    async fn hreplace(&self, key: &str, entries: HashMap<String, String>) -> Result<(), CacheError>;
}
