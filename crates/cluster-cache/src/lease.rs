//! Cross-process leases on top of the cluster cache.
//!
//! A lease is a scalar key written with set-if-absent and a TTL. The value is
//! a token unique to one acquisition, and release only deletes the key while
//! it still holds that token, so a holder whose lease already expired can
//! never release a lease that another worker has since taken over.

use crate::error::CacheError;
use crate::ClusterCache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Random identifier for this process, used as the lease owner prefix.
pub fn worker_id() -> String {
    Uuid::new_v4().to_string()
}

/// A named lease with a fixed TTL.
#[derive(Clone)]
pub struct Lease {
    cache: Arc<dyn ClusterCache>,
    key: String,
    ttl: Duration,
}

impl Lease {
    pub fn new(cache: Arc<dyn ClusterCache>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try once to take the lease for `owner`.
    pub async fn try_acquire(&self, owner: &str) -> Result<Option<LeaseGuard>, CacheError> {
        let token = format!("{}:{}", owner, Uuid::new_v4().simple());
        if self.cache.set_nx(&self.key, &token, self.ttl).await? {
            debug!(key = %self.key, %token, "Lease acquired");
            Ok(Some(LeaseGuard {
                cache: self.cache.clone(),
                key: self.key.clone(),
                token,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Keep trying to take the lease every `retry_interval` until `wait` has
    /// elapsed. Returns `None` if another holder kept it the whole time.
    pub async fn acquire(
        &self,
        owner: &str,
        wait: Duration,
        retry_interval: Duration,
    ) -> Result<Option<LeaseGuard>, CacheError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire(owner).await? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Token of the current holder, if the lease is held.
    pub async fn holder(&self) -> Result<Option<String>, CacheError> {
        self.cache.get(&self.key).await
    }
}

/// Proof of holding a lease.
///
/// Call [`LeaseGuard::release`] when the protected work is done. A guard
/// dropped without release (cancellation, early return through `?`) releases
/// from a background task when a runtime is available, and otherwise lets the
/// TTL run out.
pub struct LeaseGuard {
    cache: Arc<dyn ClusterCache>,
    key: String,
    token: String,
    released: bool,
}

impl LeaseGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lease. Returns false if it had already expired.
    pub async fn release(mut self) -> Result<bool, CacheError> {
        let released = self.cache.del_if_eq(&self.key, &self.token).await?;
        self.released = true;
        if released {
            debug!(key = %self.key, "Lease released");
        } else {
            warn!(
                key = %self.key,
                "Lease expired before release; another worker may have taken it over"
            );
        }
        Ok(released)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = cache.del_if_eq(&key, &token).await {
                        warn!("Failed to release dropped lease {}: {}", key, e);
                    }
                });
            }
            Err(_) => {
                warn!("Lease {} dropped outside a runtime; it expires after its TTL", key);
            }
        }
    }
}
