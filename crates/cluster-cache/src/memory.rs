//! In-process cluster cache with TTL expiration.

use crate::error::CacheError;
use crate::ClusterCache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
}

/// Entry in the cache with expiration tracking.
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn scalar(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: Value::Scalar(value.to_string()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory implementation of [`ClusterCache`].
///
/// Expired keys are invisible to reads immediately and are physically
/// removed by the cleanup task started with [`MemoryCache::spawn_cleanup`].
/// Clones share the same underlying map, so one instance can stand in for a
/// cache cluster shared by several simulated workers.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background task that periodically drops expired keys.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        info!("In-memory cluster cache cleanup every {:?}", interval);
        tokio::spawn(async move {
            cache.cleanup_loop(interval).await;
        })
    }

    async fn cleanup_loop(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let removed = self.purge_expired().await;
            if removed > 0 {
                debug!("Cleaned up {} expired cache keys", removed);
            }
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Remove `key` if it has expired, then return the live entry if any.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, CacheEntry>,
    key: &str,
) -> Option<&'a mut CacheEntry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl ClusterCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            None => Ok(None),
            Some(CacheEntry {
                value: Value::Scalar(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(CacheEntry {
            value: Value::Hash(_),
            ..
        }) = live_entry(&mut entries, key)
        {
            return Err(CacheError::WrongType(key.to_string()));
        }
        entries.insert(key.to_string(), CacheEntry::scalar(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        if live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), CacheEntry::scalar(value, Some(ttl)));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        if live_entry(&mut entries, key).is_none() {
            return Ok(false);
        }
        Ok(entries.remove(key).is_some())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let matches = match live_entry(&mut entries, key) {
            None => false,
            Some(CacheEntry {
                value: Value::Scalar(value),
                ..
            }) => value == expected,
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            None => Ok(None),
            Some(CacheEntry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        match live_entry(&mut entries, key) {
            Some(CacheEntry {
                value: Value::Hash(hash),
                ..
            }) => {
                hash.insert(field.to_string(), value.to_string());
            }
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
            None => {
                let mut hash = HashMap::new();
                hash.insert(field.to_string(), value.to_string());
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: Value::Hash(hash),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let (removed, now_empty) = match live_entry(&mut entries, key) {
            None => return Ok(false),
            Some(CacheEntry {
                value: Value::Hash(hash),
                ..
            }) => (hash.remove(field).is_some(), hash.is_empty()),
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        // Empty hashes do not exist.
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            None => Ok(HashMap::new()),
            Some(CacheEntry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hreplace(&self, key: &str, entries_in: HashMap<String, String>) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(CacheEntry {
            value: Value::Scalar(_),
            ..
        }) = live_entry(&mut entries, key)
        {
            return Err(CacheError::WrongType(key.to_string()));
        }
        if entries_in.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value: Value::Hash(entries_in),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }
}
