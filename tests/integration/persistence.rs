//! Restarting against persisted state

use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;
use reclaim_watch::{
    clock::Clock,
    config::StorageConfig,
    scan::ScanSettings,
    storage::{SnapshotStore, open_backend},
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

/// Open the configured backend, restore snapshot and episodes, wire a harness
async fn restart(config: &StorageConfig, fetcher: Arc<ScriptedFetcher>) -> Harness {
    let backend = open_backend(config).await.unwrap();
    let store = Arc::new(SnapshotStore::new(backend));
    store.load().await.unwrap();
    let records = store.load_alert_states().await.unwrap();

    Harness::build(fetcher, store, records, ScanSettings::default())
}

async fn restart_does_not_repeat_alerts(config: StorageConfig) {
    let fetcher = ScriptedFetcher::new();
    fetcher.owned("Harbour Street 1", "Knight", start() - Duration::days(11));
    fetcher.owned("Temple Road 3", "Druid", start() - Duration::days(2));

    let first = restart(&config, fetcher.clone()).await;
    assert!(first.store.current().is_none());

    let report = first
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.alerts, 1);
    assert!(report.alert_states_persisted);
    let before = first.store.current().unwrap();
    let states_before = first.orchestrator.alert_states().await;
    first.store.backend().close().await.unwrap();
    drop(first);

    let second = restart(&config, fetcher).await;
    let restored = second.store.current().unwrap();
    assert_eq!(restored.entities(), before.entities());
    assert_eq!(restored.timestamp(), before.timestamp());
    assert_eq!(second.orchestrator.alert_states().await, states_before);

    second.clock.advance(Duration::hours(2));
    let report = second
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.alerts, 0);
    assert!(second.notifier.fired().is_empty());

    // the episode carries on to the next threshold
    second.clock.advance(Duration::days(1));
    second
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        second.notifier.fired(),
        vec![("Harbour Street 1".to_string(), "alert".to_string())]
    );
    assert_eq!(
        second.clock.now(),
        start() + Duration::days(1) + Duration::hours(2)
    );
}

#[tokio::test]
async fn test_json_restart_does_not_repeat_alerts() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::Json {
        path: dir.path().join("cache.json"),
    };

    restart_does_not_repeat_alerts(config).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_restart_does_not_repeat_alerts() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::Sqlite {
        path: dir.path().join("reclaim.db"),
    };

    restart_does_not_repeat_alerts(config).await;
}

#[tokio::test]
async fn test_in_memory_backend_forgets_on_restart() {
    let fetcher = ScriptedFetcher::new();
    fetcher.owned("Harbour Street 1", "Knight", start() - Duration::days(11));

    let first = restart(&StorageConfig::None, fetcher.clone()).await;
    first
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.notifier.fired().len(), 1);

    let second = restart(&StorageConfig::None, fetcher).await;
    assert!(second.store.current().is_none());
    second
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.notifier.fired().len(), 1);
}

#[tokio::test]
async fn test_json_file_is_readable_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.json");
    let h = restart(&StorageConfig::Json { path: path.clone() }, ScriptedFetcher::new()).await;
    h.fetcher
        .owned("Harbour Street 1", "Knight", start() - Duration::days(11));
    h.fetcher
        .with_attribute("Harbour Street 1", "size", "42");

    h.orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(document["version"], 1);
    assert_eq!(document["snapshot"]["metadata"]["total_count"], 1);
    assert_eq!(
        document["snapshot"]["entities"][0]["attributes"]["size"],
        "42"
    );
    assert_eq!(
        document["alert_states"][0]["fired_thresholds"],
        serde_json::json!(["warn"])
    );
}
