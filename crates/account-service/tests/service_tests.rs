//! Service wiring against in-memory and snapshot-backed stores.

use account_crawler::TickOutcome;
use account_service::config::StoreConfig;
use account_service::{Config, Service};
use account_store::AccountAttributes;
use accounts::DeletionReason;
use secrecy::SecretString;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn password() -> SecretString {
    SecretString::new("correct horse".into())
}

fn persistent_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store = StoreConfig {
        persist: true,
        snapshot_path: dir.join("accounts.enc"),
        snapshot_passphrase: Some(SecretString::new("service test passphrase".into())),
        ..StoreConfig::default()
    };
    config
}

#[tokio::test]
async fn test_default_service_registers_and_crawls() {
    let service = assert_ok!(Service::build(&Config::default()).await);
    assert!(service.shadow_stats().is_none());

    let registration = assert_ok!(
        service
            .manager()
            .create("+14155550100", &password(), None, &AccountAttributes::default())
            .await
    );
    assert!(registration.fresh_user);

    let directory = service.manager().directory();
    assert_eq!(directory.version().await.unwrap(), 1);
    assert!(directory.entry("+14155550100").await.unwrap().is_some());

    let outcome = service.crawler().do_periodic_work().await.unwrap();
    assert_eq!(outcome, TickOutcome::Chunk { size: 1 });
    let outcome = service.crawler().do_periodic_work().await.unwrap();
    assert_eq!(outcome, TickOutcome::Completed);

    // The fresh account is neither stale nor carrying push feedback.
    assert!(service
        .manager()
        .get_by_uuid(registration.account.uuid)
        .await
        .unwrap()
        .is_some());
    assert_eq!(service.reconciler_timings().snapshot().chunks, 1);
    assert_eq!(service.reaper_timings().snapshot().chunks, 1);
    assert_eq!(service.push_feedback_timings().snapshot().chunks, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let mut config = Config::default();
    config.crawler.chunk_interval = Duration::from_millis(10);
    let service = Service::build(&config).await.unwrap();

    service.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), service.shutdown())
        .await
        .expect("shutdown should not hang");
}

#[tokio::test]
async fn test_persistent_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(dir.path());

    let uuid = {
        let service = Service::build(&config).await.unwrap();
        let registration = service
            .manager()
            .create("+14155550101", &password(), None, &AccountAttributes::default())
            .await
            .unwrap();
        service.shutdown().await;
        registration.account.uuid
    };
    assert!(dir.path().join("accounts.enc").exists());

    let service = Service::build(&config).await.unwrap();
    let account = service
        .manager()
        .get_by_login("+14155550101")
        .await
        .unwrap()
        .expect("account should be restored from the snapshot");
    assert_eq!(account.uuid, uuid);

    // The new cache starts with an empty directory until a crawl pass
    // rebuilds it.
    let directory = service.manager().directory().clone();
    assert!(directory.entry("+14155550101").await.unwrap().is_none());
    while service.crawler().do_periodic_work().await.unwrap() != TickOutcome::Completed {}
    assert_eq!(
        directory.entry("+14155550101").await.unwrap().map(|e| e.uuid),
        Some(uuid)
    );
    assert_eq!(directory.version().await.unwrap(), 2);
    service.shutdown().await;
}

#[tokio::test]
async fn test_deleted_uuid_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(dir.path());

    let uuid = {
        let service = Service::build(&config).await.unwrap();
        let account = service
            .manager()
            .create("+14155550104", &password(), None, &AccountAttributes::default())
            .await
            .unwrap()
            .account;
        service
            .manager()
            .delete(std::slice::from_ref(&account), DeletionReason::UserRequest)
            .await
            .unwrap();
        service.shutdown().await;
        account.uuid
    };

    let service = Service::build(&config).await.unwrap();
    let again = service
        .manager()
        .create("+14155550104", &password(), None, &AccountAttributes::default())
        .await
        .unwrap();
    assert!(again.fresh_user);
    assert_eq!(again.account.uuid, uuid);
    service.shutdown().await;
}

#[tokio::test]
async fn test_persistence_requires_key_material() {
    let dir = TempDir::new().unwrap();
    let mut config = persistent_config(dir.path());
    config.store.snapshot_passphrase = None;

    assert!(Service::build(&config).await.is_err());
}

#[tokio::test]
async fn test_wrong_passphrase_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(dir.path());

    let service = Service::build(&config).await.unwrap();
    service
        .manager()
        .create("+14155550102", &password(), None, &AccountAttributes::default())
        .await
        .unwrap();
    service.shutdown().await;

    let mut other = persistent_config(dir.path());
    other.store.snapshot_passphrase = Some(SecretString::new("another passphrase".into()));
    assert!(Service::build(&other).await.is_err());
}

#[tokio::test]
async fn test_shadow_store_mirrors_writes() {
    let dir = TempDir::new().unwrap();
    let mut config = persistent_config(dir.path());
    config.store.shadow_path = Some(dir.path().join("shadow.enc"));

    let service = Service::build(&config).await.unwrap();
    service
        .manager()
        .create("+14155550103", &password(), None, &AccountAttributes::default())
        .await
        .unwrap();

    let stats = service.shadow_stats().expect("shadow store configured").clone();
    assert_eq!(stats.mirrored(), 1);
    assert_eq!(stats.failed(), 0);
    service.shutdown().await;

    assert!(dir.path().join("shadow.enc").exists());
}

#[test]
fn test_config_defaults_from_empty_document() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert!(!config.store.persist);
    assert_eq!(config.log.level, "info");
    assert_eq!(config.crawler.chunk_size, 1000);
    assert_eq!(config.cache.cleanup_interval, Duration::from_secs(60));
    assert_eq!(config.directory.history_depth, 100);
    assert_eq!(config.manager.account_cache_ttl, Duration::from_secs(600));
    assert_eq!(
        config.manager.deleted_account_retention,
        Duration::from_secs(30 * 24 * 60 * 60)
    );
}

#[test]
fn test_config_parses_humantime_durations() {
    let config: Config = serde_json::from_str(
        r#"{
            "crawler": { "chunk_size": 50, "chunk_interval": "2s" },
            "reaper": { "max_idle": "30days" },
            "manager": { "directory_lease_ttl": "500ms" }
        }"#,
    )
    .unwrap();

    assert_eq!(config.crawler.chunk_size, 50);
    assert_eq!(config.crawler.chunk_interval, Duration::from_secs(2));
    assert_eq!(config.reaper.max_idle, Duration::from_secs(30 * 24 * 60 * 60));
    assert_eq!(config.manager.directory_lease_ttl, Duration::from_millis(500));
}
