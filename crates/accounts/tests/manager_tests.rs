//! End-to-end account lifecycle against in-memory backends.

use account_store::{
    Account, AccountAttributes, AccountStore, DeletedAccount, DeletedAccounts, DeviceId,
    MemoryAccountStore, StoreError,
};
use accounts::{
    AccountsManager, DeletionReason, DependentStoreError, DependentStores, KeyStore,
    ManagerConfig, ManagerError, MessageStore, ProfileStore, UsernameStore, DIRECTORY_LEASE_KEY,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use cluster_cache::{CacheError, ClusterCache, Lease, MemoryCache};
use directory::{DirectoryChange, DirectoryConfig, DirectoryPropagator};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_test::assert_ok;
use uuid::Uuid;

const LOGIN: &str = "+14151112222";

/// Records every purge and optionally fails the message store.
#[derive(Default)]
struct RecordingDependents {
    calls: Mutex<Vec<(&'static str, Uuid)>>,
    fail_messages: bool,
}

impl RecordingDependents {
    fn record(&self, store: &'static str, uuid: Uuid) {
        self.calls.lock().unwrap().push((store, uuid));
    }

    fn calls(&self) -> Vec<(&'static str, Uuid)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyStore for RecordingDependents {
    async fn delete_all(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        self.record("keys", uuid);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for RecordingDependents {
    async fn clear(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        self.record("messages", uuid);
        if self.fail_messages {
            return Err(DependentStoreError::Failed {
                store: "messages",
                uuid,
                reason: "unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for RecordingDependents {
    async fn delete_all(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        self.record("profiles", uuid);
        Ok(())
    }
}

#[async_trait]
impl UsernameStore for RecordingDependents {
    async fn clear(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        self.record("usernames", uuid);
        Ok(())
    }
}

/// A cluster cache that is always down.
struct UnavailableCache;

#[async_trait]
impl ClusterCache for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn del(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn del_if_eq(&self, _key: &str, _expected: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn hget(&self, _key: &str, _field: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn hset(&self, _key: &str, _field: &str, _value: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn hdel(&self, _key: &str, _field: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn hgetall(&self, _key: &str) -> Result<HashMap<String, String>, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
    async fn hreplace(&self, _key: &str, _entries: HashMap<String, String>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
}

/// A memory cache that can be switched off.
#[derive(Default)]
struct FlakyCache {
    inner: MemoryCache,
    down: AtomicBool,
}

impl FlakyCache {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterCache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.set_nx(key, value, ttl).await
    }
    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.del(key).await
    }
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.del_if_eq(key, expected).await
    }
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.hget(key, field).await
    }
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.hset(key, field, value).await
    }
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.hdel(key, field).await
    }
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check()?;
        self.inner.hgetall(key).await
    }
    async fn hreplace(&self, key: &str, entries: HashMap<String, String>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.hreplace(key, entries).await
    }
}

/// Pauses the next uuid read after it has hit the store, until released.
#[derive(Default)]
struct GatedStore {
    inner: MemoryAccountStore,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl GatedStore {
    /// Returns a receiver firing once the read happened and a sender that
    /// lets it finish.
    fn arm(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (read_tx, read_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some((read_tx, resume_rx));
        (read_rx, resume_tx)
    }
}

#[async_trait]
impl AccountStore for GatedStore {
    async fn create(&self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError> {
        self.inner.create(account, directory_version).await
    }
    async fn update(&self, account: &mut Account) -> Result<(), StoreError> {
        self.inner.update(account).await
    }
    async fn get_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_login(login).await
    }
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, StoreError> {
        let account = self.inner.get_by_uuid(uuid).await?;
        let gate = self.gate.lock().unwrap().take();
        if let Some((read, resume)) = gate {
            let _ = read.send(());
            let _ = resume.await;
        }
        Ok(account)
    }
    async fn delete(&self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError> {
        self.inner.delete(uuid, directory_version).await
    }
    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, StoreError> {
        self.inner.get_all_from(after, limit).await
    }
    async fn directory_version(&self) -> Result<u64, StoreError> {
        self.inner.directory_version().await
    }
    async fn advance_directory_version(&self, directory_version: u64) -> Result<(), StoreError> {
        self.inner.advance_directory_version(directory_version).await
    }
    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }
}

/// Delegates to a memory store but reports every update as contested.
struct ContestedStore {
    inner: MemoryAccountStore,
}

#[async_trait]
impl AccountStore for ContestedStore {
    async fn create(&self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError> {
        self.inner.create(account, directory_version).await
    }
    async fn update(&self, account: &mut Account) -> Result<(), StoreError> {
        Err(StoreError::ContestedOptimisticLock(account.uuid))
    }
    async fn get_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_login(login).await
    }
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_uuid(uuid).await
    }
    async fn delete(&self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError> {
        self.inner.delete(uuid, directory_version).await
    }
    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, StoreError> {
        self.inner.get_all_from(after, limit).await
    }
    async fn directory_version(&self) -> Result<u64, StoreError> {
        self.inner.directory_version().await
    }
    async fn advance_directory_version(&self, directory_version: u64) -> Result<(), StoreError> {
        self.inner.advance_directory_version(directory_version).await
    }
    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }
}

struct Harness {
    manager: AccountsManager,
    store: Arc<dyn AccountStore>,
    cache: Arc<dyn ClusterCache>,
    ledger: Arc<MemoryAccountStore>,
    directory: Arc<DirectoryPropagator>,
    dependents: Arc<RecordingDependents>,
}

fn harness_with(
    store: Arc<dyn AccountStore>,
    cache: Arc<dyn ClusterCache>,
    dependents: RecordingDependents,
    config: ManagerConfig,
) -> Harness {
    let directory = Arc::new(DirectoryPropagator::new(
        cache.clone(),
        &DirectoryConfig::default(),
    ));
    let ledger = Arc::new(MemoryAccountStore::new());
    let dependents = Arc::new(dependents);
    let manager = AccountsManager::new(
        store.clone(),
        cache.clone(),
        directory.clone(),
        ledger.clone(),
        DependentStores {
            keys: dependents.clone(),
            messages: dependents.clone(),
            profiles: dependents.clone(),
            usernames: dependents.clone(),
        },
        config,
    );
    Harness {
        manager,
        store,
        cache,
        ledger,
        directory,
        dependents,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig::default(),
    )
}

fn password() -> SecretString {
    SecretString::new("correct horse".into())
}

#[tokio::test]
async fn test_account_lifecycle() {
    let h = harness();

    let registration = h
        .manager
        .create(LOGIN, &password(), Some("OWA".into()), &AccountAttributes::default())
        .await
        .unwrap();
    assert!(registration.fresh_user);
    let account = registration.account;
    assert_eq!(account.version, 0);
    assert_eq!(h.store.directory_version().await.unwrap(), 1);
    assert_eq!(h.directory.version().await.unwrap(), 1);
    assert!(h.directory.entry(LOGIN).await.unwrap().is_some());

    let primary = account.primary_device().unwrap();
    assert!(primary.credential.verify(&password()));
    assert_eq!(primary.user_agent.as_deref(), Some("OWA"));
    assert!(primary.push.fetches_messages);

    let updated = h
        .manager
        .update(&account, |a| {
            a.profile_name = Some("Alice".into());
            true
        })
        .await
        .unwrap();
    assert_eq!(updated.version, 1);

    // A writer still holding version 0 loses.
    let mut stale = account.clone();
    stale.profile_name = Some("Mallory".into());
    let result = h.store.update(&mut stale).await;
    assert!(matches!(result, Err(StoreError::ContestedOptimisticLock(_))));

    assert_ok!(
        h.manager
            .delete(std::slice::from_ref(&updated), DeletionReason::UserRequest)
            .await
    );
    assert!(h.manager.get_by_uuid(account.uuid).await.unwrap().is_none());
    assert!(h.manager.get_by_login(LOGIN).await.unwrap().is_none());
    assert!(h.directory.entry(LOGIN).await.unwrap().is_none());
    assert_eq!(h.directory.version().await.unwrap(), 2);
    assert_eq!(
        h.ledger.find_uuid(LOGIN).await.unwrap(),
        Some(account.uuid)
    );

    let purged: Vec<_> = h.dependents.calls().into_iter().map(|(s, _)| s).collect();
    assert_eq!(purged.len(), 4);
    assert!(purged.contains(&"usernames"));
}

#[tokio::test]
async fn test_create_replay_keeps_original_uuid() {
    let h = harness();
    let attributes = AccountAttributes::default();

    let first = h
        .manager
        .create(LOGIN, &password(), None, &attributes)
        .await
        .unwrap();
    let second = h
        .manager
        .create("+1 (415) 111-2222", &password(), None, &attributes)
        .await
        .unwrap();

    assert!(!second.fresh_user);
    assert_eq!(second.account.uuid, first.account.uuid);
    assert_eq!(second.account.version, 1);
    assert_eq!(h.store.count().await.unwrap(), 1);

    let stored = h.manager.get_by_login(LOGIN).await.unwrap().unwrap();
    assert_eq!(stored.uuid, first.account.uuid);

    // Derived state of the adopted uuid was wiped, usernames kept.
    let calls = h.dependents.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(_, uuid)| *uuid == first.account.uuid));
    assert!(!calls.iter().any(|(store, _)| *store == "usernames"));
}

#[tokio::test]
async fn test_directory_version_counts_batches() {
    let h = harness();
    let attributes = AccountAttributes::default();

    let a = h
        .manager
        .create("+14150000001", &password(), None, &attributes)
        .await
        .unwrap();
    let b = h
        .manager
        .create("+14150000002", &password(), None, &attributes)
        .await
        .unwrap();
    h.manager
        .create("+14150000003", &password(), None, &attributes)
        .await
        .unwrap();
    h.manager
        .delete(&[a.account, b.account], DeletionReason::AdminDeleted)
        .await
        .unwrap();

    assert_eq!(h.store.directory_version().await.unwrap(), 4);
    assert_eq!(h.directory.version().await.unwrap(), 4);
    assert_eq!(h.directory.generation_count().await.unwrap(), 4);

    let (_, entries) = h.directory.full_directory().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key("+14150000003"));
}

#[tokio::test]
async fn test_reregistration_recovers_deleted_uuid() {
    let h = harness();
    let attributes = AccountAttributes::default();

    let first = h
        .manager
        .create(LOGIN, &password(), None, &attributes)
        .await
        .unwrap();
    h.manager
        .delete(std::slice::from_ref(&first.account), DeletionReason::Expired)
        .await
        .unwrap();

    let again = h
        .manager
        .create(LOGIN, &password(), None, &attributes)
        .await
        .unwrap();
    assert!(again.fresh_user);
    assert_eq!(again.account.uuid, first.account.uuid);
    assert!(h.ledger.find_uuid(LOGIN).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(UnavailableCache),
        RecordingDependents::default(),
        ManagerConfig::default(),
    );

    let registration = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap();
    let uuid = registration.account.uuid;

    let by_login = h.manager.get_by_login(LOGIN).await.unwrap().unwrap();
    assert_eq!(by_login.uuid, uuid);

    let updated = h
        .manager
        .update(&by_login, |a| {
            a.discoverable = false;
            true
        })
        .await
        .unwrap();
    assert_eq!(updated.version, 1);

    h.manager
        .delete(&[updated], DeletionReason::AdminDeleted)
        .await
        .unwrap();
    assert!(h.manager.get_by_uuid(uuid).await.unwrap().is_none());
    assert!(h.cache.get("anything").await.is_err());
}

#[tokio::test]
async fn test_update_gives_up_after_retry_limit() {
    let h = harness_with(
        Arc::new(ContestedStore {
            inner: MemoryAccountStore::new(),
        }),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig {
            max_update_attempts: 3,
            ..ManagerConfig::default()
        },
    );

    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;

    let mut applied = 0;
    let result = h
        .manager
        .update(&account, |a| {
            applied += 1;
            a.profile_name = Some("Alice".into());
            true
        })
        .await;

    match result {
        Err(ManagerError::RetryLimitExceeded { uuid, attempts }) => {
            assert_eq!(uuid, account.uuid);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RetryLimitExceeded, got {:?}", other),
    }
    assert_eq!(applied, 3);
}

#[tokio::test]
async fn test_update_reapplies_mutation_on_conflict() {
    let h = harness();
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;

    // Someone else writes first.
    let mut concurrent = account.clone();
    concurrent.profile_name = Some("Alice".into());
    h.store.update(&mut concurrent).await.unwrap();

    let updated = h
        .manager
        .update(&account, |a| {
            a.unrestricted_unidentified_access = true;
            true
        })
        .await
        .unwrap();

    assert_eq!(updated.version, 2);
    assert_eq!(updated.profile_name, Some("Alice".into()));
    assert!(updated.unrestricted_unidentified_access);
}

#[tokio::test]
async fn test_unchanged_update_is_not_written() {
    let h = harness();
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;

    let same = h.manager.update(&account, |_| false).await.unwrap();
    assert_eq!(same.version, 0);
    assert_eq!(
        h.store.get_by_uuid(account.uuid).await.unwrap().unwrap().version,
        0
    );
}

#[tokio::test]
async fn test_last_seen_only_moves_forward() {
    let h = harness();
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;
    let seen = account.primary_device().unwrap().last_seen;

    let earlier = h
        .manager
        .update_device_last_seen(&account, DeviceId::PRIMARY, seen - ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(earlier.version, 0);

    let later_time = Utc::now() + ChronoDuration::hours(1);
    let later = h
        .manager
        .update_device_last_seen(&account, DeviceId::PRIMARY, later_time)
        .await
        .unwrap();
    assert_eq!(later.version, 1);
    assert_eq!(later.primary_device().unwrap().last_seen, later_time);

    let missing = h
        .manager
        .update_device_last_seen(&later, DeviceId(7), later_time + ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(missing.version, 1);
}

#[tokio::test]
async fn test_held_directory_lease_times_out() {
    let cache = Arc::new(MemoryCache::new());
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        cache.clone(),
        RecordingDependents::default(),
        ManagerConfig {
            lease_wait: Duration::from_millis(50),
            lease_retry_interval: Duration::from_millis(10),
            ..ManagerConfig::default()
        },
    );

    let other = Lease::new(cache, DIRECTORY_LEASE_KEY, Duration::from_secs(30));
    let _held = other.try_acquire("other-worker").await.unwrap().unwrap();

    let result = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await;
    match result {
        Err(ManagerError::LeaseUnavailable(reason)) => assert!(reason.contains("other-worker")),
        other => panic!("expected LeaseUnavailable, got {:?}", other),
    }
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dependent_failure_keeps_account() {
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryCache::new()),
        RecordingDependents {
            fail_messages: true,
            ..RecordingDependents::default()
        },
        ManagerConfig::default(),
    );
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;

    let result = h
        .manager
        .delete(std::slice::from_ref(&account), DeletionReason::AdminDeleted)
        .await;

    assert!(matches!(result, Err(ManagerError::Dependent(_))));
    assert!(h.store.get_by_uuid(account.uuid).await.unwrap().is_some());
    assert!(h.directory.entry(LOGIN).await.unwrap().is_some());
    assert!(h.ledger.find_uuid(LOGIN).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_login_rejected() {
    let h = harness();
    let result = h
        .manager
        .create("12345", &password(), None, &AccountAttributes::default())
        .await;
    assert!(matches!(result, Err(ManagerError::InvalidLogin(_))));
}

#[tokio::test]
async fn test_lookup_by_login_normalizes() {
    let h = harness();
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;

    let found = h.manager.get_by_login("+1 (415) 111-2222").await.unwrap();
    assert_eq!(found.map(|a| a.uuid), Some(account.uuid));

    let result = h.manager.get_by_login("12345").await;
    assert!(matches!(result, Err(ManagerError::InvalidLogin(_))));
}

#[tokio::test]
async fn test_slow_read_does_not_overwrite_newer_cached_account() {
    let store = Arc::new(GatedStore::default());
    let h = harness_with(
        store.clone(),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig::default(),
    );
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;
    h.cache
        .del(&format!("Account::{}", account.uuid))
        .await
        .unwrap();

    let (read_done, resume) = store.arm();
    let reader = h.manager.get_by_uuid(account.uuid);
    let writer = async {
        read_done.await.unwrap();
        let updated = h
            .manager
            .update(&account, |a| {
                a.profile_name = Some("Alice".into());
                true
            })
            .await
            .unwrap();
        resume.send(()).unwrap();
        updated
    };
    let (read, updated) = tokio::join!(reader, writer);

    assert_eq!(read.unwrap().unwrap().version, 0);
    assert_eq!(updated.version, 1);
    let cached = h.manager.get_by_uuid(account.uuid).await.unwrap().unwrap();
    assert_eq!(cached.version, 1);
    assert_eq!(cached.profile_name, Some("Alice".into()));
}

#[tokio::test]
async fn test_failed_adoption_purge_still_publishes_directory() {
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryCache::new()),
        RecordingDependents {
            fail_messages: true,
            ..RecordingDependents::default()
        },
        ManagerConfig::default(),
    );
    let attributes = AccountAttributes::default();
    let first = h
        .manager
        .create(LOGIN, &password(), None, &attributes)
        .await
        .unwrap();

    let result = h.manager.create(LOGIN, &password(), None, &attributes).await;
    assert!(matches!(result, Err(ManagerError::Dependent(_))));

    // The store committed version 2, so the directory has to follow.
    assert_eq!(h.store.directory_version().await.unwrap(), 2);
    assert_eq!(h.directory.version().await.unwrap(), 2);
    assert_eq!(h.directory.generation_count().await.unwrap(), 2);
    let stored = h.store.get_by_login(LOGIN).await.unwrap().unwrap();
    assert_eq!(stored.uuid, first.account.uuid);
    assert_eq!(stored.version, 1);
    assert_eq!(
        h.directory.entry(LOGIN).await.unwrap().map(|e| e.uuid),
        Some(first.account.uuid)
    );
}

#[tokio::test]
async fn test_reconcile_rebuilds_directory_after_cache_loss() {
    let store = Arc::new(MemoryAccountStore::new());
    let before = harness_with(
        store.clone(),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig::default(),
    );
    let visible = before
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;
    let hidden = AccountAttributes {
        discoverable: false,
        ..AccountAttributes::default()
    };
    before
        .manager
        .create("+14153334444", &password(), None, &hidden)
        .await
        .unwrap();
    assert_eq!(store.directory_version().await.unwrap(), 2);

    // A fresh cache, as after a cache restart.
    let h = harness_with(
        store.clone(),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig::default(),
    );
    assert!(h.directory.entry(LOGIN).await.unwrap().is_none());

    let accounts = h.manager.get_all_from(None, 100).await.unwrap();
    assert_eq!(h.manager.reconcile_directory(&accounts).await.unwrap(), 1);
    assert_eq!(h.manager.reconcile_directory(&accounts).await.unwrap(), 0);
    assert_eq!(h.manager.publish_directory_changes().await.unwrap(), 3);

    assert_eq!(store.directory_version().await.unwrap(), 3);
    assert_eq!(h.directory.version().await.unwrap(), 3);
    assert_eq!(
        h.directory.entry(LOGIN).await.unwrap().map(|e| e.uuid),
        Some(visible.uuid)
    );
    assert!(h.directory.entry("+14153334444").await.unwrap().is_none());

    let diff = h.directory.incremental_update(2).await.unwrap().unwrap();
    assert_eq!(diff.changes.len(), 1);
    assert!(matches!(
        diff.changes[LOGIN],
        DirectoryChange::Added { .. }
    ));
}

#[tokio::test]
async fn test_reconcile_lists_accounts_created_during_outage() {
    let cache = Arc::new(FlakyCache::default());
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        cache.clone(),
        RecordingDependents::default(),
        ManagerConfig::default(),
    );

    cache.set_down(true);
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;
    cache.set_down(false);

    assert_eq!(h.store.directory_version().await.unwrap(), 1);
    assert!(h.directory.entry(LOGIN).await.unwrap().is_none());

    assert_eq!(
        h.manager
            .reconcile_directory(std::slice::from_ref(&account))
            .await
            .unwrap(),
        1
    );
    assert_eq!(h.manager.publish_directory_changes().await.unwrap(), 2);
    assert!(h.directory.entry(LOGIN).await.unwrap().is_some());
    assert_eq!(h.directory.version().await.unwrap(), 2);
}

#[tokio::test]
async fn test_sweep_withdraws_dangling_listings() {
    let h = harness();
    let attributes = AccountAttributes::default();
    let gone = h
        .manager
        .create(LOGIN, &password(), None, &attributes)
        .await
        .unwrap()
        .account;
    let hidden = h
        .manager
        .create("+14153334444", &password(), None, &attributes)
        .await
        .unwrap()
        .account;
    h.manager
        .create("+14155556666", &password(), None, &attributes)
        .await
        .unwrap();

    // Changes that reached the store but never the directory.
    h.store.delete(gone.uuid, 3).await.unwrap();
    let mut hidden = hidden;
    hidden.discoverable = false;
    h.store.update(&mut hidden).await.unwrap();

    assert_eq!(h.manager.sweep_directory().await.unwrap(), 2);
    assert_eq!(h.manager.sweep_directory().await.unwrap(), 0);
    assert_eq!(h.manager.publish_directory_changes().await.unwrap(), 4);

    let (version, entries) = h.directory.full_directory().await.unwrap();
    assert_eq!(version, 4);
    assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["+14155556666"]);
    let diff = h.directory.incremental_update(3).await.unwrap().unwrap();
    assert_eq!(diff.changes[LOGIN], DirectoryChange::Removed);
    assert_eq!(diff.changes["+14153334444"], DirectoryChange::Removed);
}

#[tokio::test]
async fn test_prune_deleted_accounts_honors_retention() {
    let h = harness_with(
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryCache::new()),
        RecordingDependents::default(),
        ManagerConfig {
            deleted_account_retention: Duration::from_secs(60 * 60),
            ..ManagerConfig::default()
        },
    );
    let account = h
        .manager
        .create(LOGIN, &password(), None, &AccountAttributes::default())
        .await
        .unwrap()
        .account;
    h.manager
        .delete(std::slice::from_ref(&account), DeletionReason::UserRequest)
        .await
        .unwrap();
    h.ledger
        .put(DeletedAccount {
            uuid: Uuid::new_v4(),
            login: "+14153334444".into(),
            deleted_at: Utc::now() - ChronoDuration::hours(2),
        })
        .await
        .unwrap();

    assert_eq!(h.manager.prune_deleted_accounts().await.unwrap(), 1);
    assert!(h.ledger.find_uuid("+14153334444").await.unwrap().is_none());
    assert_eq!(h.ledger.find_uuid(LOGIN).await.unwrap(), Some(account.uuid));
    assert_eq!(h.manager.prune_deleted_accounts().await.unwrap(), 0);
}
