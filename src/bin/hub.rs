use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use reclaim_watch::{
    actors::{Schedule, ScannerHandle},
    alerts::{AlertManager, HttpNotifier, tracker::AlertStateTracker},
    clock::{Clock, SystemClock},
    config::{Config, read_config_file},
    fetcher::HtmlFetcher,
    query::QueryEngine,
    scan::{ScanOrchestrator, ScanSettings},
    storage::{SnapshotStore, open_backend},
    util::get_config_path,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $RECLAIM_CONFIG or ./reclaim.json)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("reclaim_watch", LevelFilter::DEBUG),
        ("reclaim_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;
    info!("loaded configuration from {path}");

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let table = config.threshold_table()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let backend = open_backend(&config.storage())
        .await
        .context("failed to open storage backend")?;
    let store = Arc::new(SnapshotStore::new(backend.clone()));
    store.load().await.context("failed to restore snapshot")?;

    let records = store
        .load_alert_states()
        .await
        .context("failed to restore alert states")?;
    debug!("restored {} alert episodes", records.len());
    let tracker = AlertStateTracker::from_records(table.clone(), records);

    if config.alert.is_none() && config.thresholds.iter().all(|t| t.alert.is_none()) {
        warn!("no alert destination configured, alerts will only be logged");
    }
    let notifier = Arc::new(HttpNotifier::new()?);
    let alerts = AlertManager::from_config(&config, notifier)?;

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::new(HtmlFetcher::new(&config.source)?),
        store.clone(),
        tracker,
        alerts,
        clock.clone(),
        ScanSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let scanner = ScannerHandle::spawn_with_token(
        orchestrator,
        Schedule {
            interval: Duration::from_secs(config.scan.interval_secs),
            run_on_start: config.scan.run_on_start,
        },
        shutdown.child_token(),
    );

    let query = Arc::new(QueryEngine::new(
        store.clone(),
        clock,
        table,
        config.query.eligibility_cutoff,
    ));

    #[cfg(feature = "api")]
    {
        use reclaim_watch::api::{ApiState, spawn_api_server};

        if let Some(settings) = &config.api {
            let state = ApiState::new(query.clone(), store.clone()).with_scanner(scanner.clone());
            spawn_api_server(settings, state).await?;
        }
    }
    #[cfg(not(feature = "api"))]
    let _ = &query;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    shutdown.cancel();
    if let Err(e) = scanner.shutdown().await {
        error!("{e:#}");
    }
    if let Err(e) = backend.close().await {
        error!("failed to close storage backend: {e}");
    }

    Ok(())
}
