//! End-to-end scan cycles: fetch, commit, alert, dispatch

use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use chrono::Duration;
use pretty_assertions::assert_eq;
use reclaim_watch::{
    clock::Clock,
    monitors::idle::idle_duration,
    query::QueryEngine,
    scan::{ScanError, ScanSettings},
    storage::SnapshotStore,
};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

fn days_hours_minutes(days: i64, hours: i64, minutes: i64) -> Duration {
    Duration::days(days) + Duration::hours(hours) + Duration::minutes(minutes)
}

#[tokio::test]
async fn test_warn_fires_once_when_crossing_first_threshold() {
    let h = Harness::new();
    let cancel = CancellationToken::new();

    // idle 9.99d
    h.fetcher
        .owned("Harbour Street 1", "Knight", start() - days_hours_minutes(9, 23, 46));

    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 0);
    assert!(h.notifier.fired().is_empty());

    // idle 10.1d
    h.clock.advance(Duration::hours(2) + Duration::minutes(38));
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 1);
    assert_eq!(report.dispatch.delivered, 1);
    assert_eq!(
        h.notifier.fired(),
        vec![("Harbour Street 1".to_string(), "warn".to_string())]
    );

    // nothing new on an unchanged rescan
    h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(h.notifier.fired().len(), 1);
}

#[tokio::test]
async fn test_thresholds_fire_in_ascending_order_in_one_scan() {
    let h = Harness::new();
    h.fetcher
        .owned("Temple Road 3", "Druid", start() - Duration::days(20));

    h.orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    let kinds: Vec<_> = h.notifier.fired().into_iter().map(|(_, kind)| kind).collect();
    assert_eq!(kinds, ["warn", "alert", "imminent"]);
}

#[tokio::test]
async fn test_owner_return_starts_new_episode() {
    let h = Harness::new();
    let cancel = CancellationToken::new();

    h.fetcher
        .owned("Market Lane 2", "Mage", start() - Duration::days(10));
    h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(h.notifier.fired().len(), 1);

    // owner logs in
    h.clock.advance(Duration::hours(1));
    h.fetcher.owned("Market Lane 2", "Mage", h.clock.now());
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 0);

    let states = h.orchestrator.alert_states().await;
    assert_eq!(states.len(), 1);
    assert!(states[0].fired_thresholds.is_empty());

    let snapshot = h.store.current().unwrap();
    let entity = snapshot.get("Market Lane 2").unwrap();
    assert_eq!(idle_duration(entity, h.clock.now()), Some(Duration::zero()));

    // idle again for 10 days
    h.clock.advance(Duration::days(10));
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 1);
    assert_eq!(
        h.notifier.fired(),
        vec![
            ("Market Lane 2".to_string(), "warn".to_string()),
            ("Market Lane 2".to_string(), "warn".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_failed_fetch_skips_entity_without_resetting_episode() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let last_login = start() - Duration::days(11);

    h.fetcher.owned("X", "Knight", last_login);
    h.fetcher.owned("Y", "Druid", start());
    h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(h.notifier.fired().len(), 1);

    h.fetcher.fail("X");
    h.clock.advance(Duration::hours(6));
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.fetched, 1);
    assert!(!h.store.current().unwrap().contains("X"));

    let states = h.orchestrator.alert_states().await;
    let x = states.iter().find(|s| s.entity_id == "X").unwrap();
    assert_eq!(x.fired_thresholds, ["warn"]);
    assert_eq!(x.episode_start, last_login);

    h.fetcher.recover("X");
    h.clock.advance(Duration::hours(6));
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 0);

    let snapshot = h.store.current().unwrap();
    let x = snapshot.get("X").unwrap();
    assert_eq!(
        idle_duration(x, h.clock.now()),
        Some(Duration::days(11) + Duration::hours(12))
    );
    assert_eq!(h.notifier.fired().len(), 1);
}

#[tokio::test]
async fn test_entity_missing_twice_is_evicted() {
    let h = Harness::new();
    let cancel = CancellationToken::new();

    h.fetcher.owned("X", "Knight", start() - Duration::days(11));
    h.orchestrator.run_scan(&cancel).await.unwrap();

    h.fetcher.remove("X");
    h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(h.orchestrator.alert_states().await.len(), 1);

    h.orchestrator.run_scan(&cancel).await.unwrap();
    assert!(h.orchestrator.alert_states().await.is_empty());
}

#[tokio::test]
async fn test_unparseable_activity_is_never_alerted() {
    let h = Harness::new();
    h.fetcher
        .put("Old Tower", Some("Ghost"), Some("nigdy".to_string()));
    h.fetcher.put("Quiet Hut", Some("Hermit"), None);

    let report = h
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.alerts, 0);
    assert!(h.orchestrator.alert_states().await.is_empty());

    let snapshot = h.store.current().unwrap();
    assert_eq!(snapshot.get("Old Tower").unwrap().last_activity, None);
}

#[tokio::test]
async fn test_top_three_of_five() {
    let h = Harness::new();
    for (id, days) in [("a", 9), ("b", 15), ("c", 11), ("d", 20), ("e", 8)] {
        h.fetcher
            .owned(id, &format!("owner-{id}"), start() - Duration::days(days));
    }
    h.orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    let query = QueryEngine::new(
        h.store.clone(),
        Arc::new(h.clock.clone()),
        scenario_table(),
        None,
    );
    let top: Vec<_> = query
        .top_n(3, None)
        .unwrap()
        .into_iter()
        .map(|e| (e.id, e.idle.num_days()))
        .collect();

    assert_eq!(
        top,
        vec![
            ("d".to_string(), 20),
            ("b".to_string(), 15),
            ("c".to_string(), 11)
        ]
    );
}

#[tokio::test]
async fn test_unchanged_source_yields_identical_snapshots() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    for i in 0..12 {
        h.fetcher
            .owned(&format!("house-{i:02}"), "Knight", start() - Duration::days(i));
        h.fetcher.with_attribute(&format!("house-{i:02}"), "size", &(i * 10).to_string());
    }
    h.fetcher.set_delay(StdDuration::from_millis(1));

    h.orchestrator.run_scan(&cancel).await.unwrap();
    let first = h.store.current().unwrap();

    h.clock.advance(Duration::minutes(5));
    h.orchestrator.run_scan(&cancel).await.unwrap();
    let second = h.store.current().unwrap();

    assert_eq!(first.entities(), second.entities());
    assert_ne!(first.timestamp(), second.timestamp());
}

#[tokio::test]
async fn test_detail_fetches_respect_concurrency_limit() {
    let settings = ScanSettings {
        concurrency: 4,
        ..Default::default()
    };
    let h = Harness::with_settings(Arc::new(SnapshotStore::in_memory()), settings);
    for i in 0..30 {
        h.fetcher
            .owned(&format!("house-{i}"), "Knight", start() - Duration::days(1));
    }
    h.fetcher.set_delay(StdDuration::from_millis(10));

    let report = h
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fetched, 30);
    assert_eq!(h.fetcher.detail_calls(), 30);
    assert!(h.fetcher.max_in_flight() <= 4);
    assert!(h.fetcher.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_slow_fetch_times_out_and_is_skipped() {
    let settings = ScanSettings {
        fetch_timeout: StdDuration::from_millis(50),
        ..Default::default()
    };
    let h = Harness::with_settings(Arc::new(SnapshotStore::in_memory()), settings);
    h.fetcher.owned("fast", "Knight", start());
    h.fetcher.owned("slow", "Druid", start());
    h.fetcher.slow("slow", StdDuration::from_secs(5));

    let report = h
        .orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let snapshot = h.store.current().unwrap();
    assert!(snapshot.contains("fast"));
    assert!(!snapshot.contains("slow"));
}

#[tokio::test]
async fn test_persistence_failure_keeps_previous_snapshot_and_skips_alerts() {
    let backend = Arc::new(FlakyBackend::default());
    let store = Arc::new(SnapshotStore::new(backend.clone()));
    let h = Harness::with_settings(store, ScanSettings::default());
    let cancel = CancellationToken::new();

    h.fetcher.owned("X", "Knight", start() - Duration::days(5));
    h.orchestrator.run_scan(&cancel).await.unwrap();
    let committed = h.store.current().unwrap();

    backend.set_failing(true);
    h.clock.advance(Duration::days(6));
    assert_matches!(
        h.orchestrator.run_scan(&cancel).await,
        Err(ScanError::Persistence(_))
    );

    assert!(Arc::ptr_eq(&committed, &h.store.current().unwrap()));
    assert!(h.notifier.fired().is_empty());

    // the next healthy cycle catches up
    backend.set_failing(false);
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 1);
}

#[tokio::test]
async fn test_unpersisted_alert_states_withhold_alerts_across_restart() {
    let backend = Arc::new(FlakyBackend::default());
    let store = Arc::new(SnapshotStore::new(backend.clone()));
    let h = Harness::with_settings(store, ScanSettings::default());
    let cancel = CancellationToken::new();

    h.fetcher.owned("H1", "Knight", start() - Duration::days(11));

    backend.set_alert_states_failing(true);
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert!(!report.alert_states_persisted);
    assert_eq!(report.alerts, 0);
    assert!(h.notifier.fired().is_empty());
    assert!(h.store.current().unwrap().contains("H1"));

    // storage recovers: the withheld alert goes out exactly once
    backend.set_alert_states_failing(false);
    h.clock.advance(Duration::hours(1));
    let report = h.orchestrator.run_scan(&cancel).await.unwrap();
    assert!(report.alert_states_persisted);
    assert_eq!(h.notifier.fired(), vec![("H1".to_string(), "warn".to_string())]);

    // restart from the same backend
    let store = Arc::new(SnapshotStore::new(backend.clone()));
    store.load().await.unwrap();
    let records = store.load_alert_states().await.unwrap();
    let restarted = Harness::build(h.fetcher.clone(), store, records, ScanSettings::default());
    restarted.clock.set(h.clock.now() + Duration::hours(1));

    let report = restarted.orchestrator.run_scan(&cancel).await.unwrap();
    assert_eq!(report.alerts, 0);
    assert!(restarted.notifier.fired().is_empty());
}

#[tokio::test]
async fn test_progress_reports_converge() {
    let settings = ScanSettings {
        concurrency: 1,
        progress_batch: 3,
        ..Default::default()
    };
    let h = Harness::with_settings(Arc::new(SnapshotStore::in_memory()), settings);
    for i in 0..10 {
        h.fetcher
            .owned(&format!("house-{i}"), "Knight", start());
    }
    h.fetcher.set_delay(StdDuration::from_millis(2));
    let mut progress = h.orchestrator.subscribe();

    h.orchestrator
        .run_scan(&CancellationToken::new())
        .await
        .unwrap();

    let mut reports = Vec::new();
    while let Ok(report) = progress.try_recv() {
        reports.push(report);
    }

    let completed: Vec<_> = reports.iter().map(|r| r.completed).collect();
    assert_eq!(completed, [3, 6, 9, 10]);
    assert!(reports.iter().all(|r| r.total == 10 && r.eta.is_some()));
    assert_eq!(reports.last().unwrap().eta, Some(StdDuration::ZERO));
}

#[tokio::test]
async fn test_cancellation_discards_partial_scan() {
    let h = Harness::new();
    for i in 0..5 {
        h.fetcher
            .owned(&format!("house-{i}"), "Knight", start() - Duration::days(30));
    }
    h.fetcher.set_delay(StdDuration::from_secs(10));

    let cancel = CancellationToken::new();
    let scan = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        let cancel = cancel.clone();
        async move { orchestrator.run_scan(&cancel).await }
    });

    while h.fetcher.detail_calls() == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    assert_matches!(scan.await.unwrap(), Err(ScanError::Cancelled));
    assert!(h.store.current().is_none());
    assert!(h.notifier.fired().is_empty());
    assert!(!h.orchestrator.is_scanning());

    // lock released: a fresh scan can run
    h.fetcher.set_delay(StdDuration::ZERO);
    assert!(h.orchestrator.run_scan(&CancellationToken::new()).await.is_ok());
}

#[tokio::test]
async fn test_second_scan_is_rejected_while_running() {
    let h = Harness::new();
    h.fetcher.owned("house", "Knight", start());
    h.fetcher.set_delay(StdDuration::from_millis(200));

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.run_scan(&CancellationToken::new()).await }
    });
    while !h.orchestrator.is_scanning() {
        tokio::task::yield_now().await;
    }

    assert_matches!(
        h.orchestrator.run_scan(&CancellationToken::new()).await,
        Err(ScanError::AlreadyRunning)
    );
    assert!(first.await.unwrap().is_ok());
}
