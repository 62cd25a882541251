//! Scan orchestration
//!
//! One scan cycle:
//!
//! ```text
//! list_population ──► fetch_detail × N (bounded, per-item timeout) ──► Snapshot
//!                                                                         │
//!        dispatch ◄── persist alert states ◄── tracker.evaluate ◄── store.commit
//! ```
//!
//! Failed detail fetches skip the entity for this cycle. Cancellation stops
//! issuing fetches, drops in-flight ones and skips the commit. Alerts are
//! evaluated against the committed snapshot only, and dispatched after it and
//! after the alert episodes that record them have been persisted.

pub mod progress;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::tracker::{AlertStateRecord, AlertStateTracker};
use crate::alerts::{AlertManager, DispatchSummary};
use crate::clock::Clock;
use crate::config::{Config, DEFAULT_ACTIVITY_FORMAT};
use crate::fetcher::{FetchError, Fetcher, RawDetail, RawEntityRef, parse_last_activity};
use crate::storage::{SnapshotStore, StorageError};
use crate::{Entity, Snapshot};

pub use progress::{ProgressCounter, ScanProgress, estimate_remaining};

/// Tuning knobs of a scan
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Maximum number of detail fetches in flight
    pub concurrency: usize,

    /// Timeout of a single detail fetch
    pub fetch_timeout: Duration,

    /// Publish progress after this many completed items
    pub progress_batch: usize,

    /// chrono format of the last-activity text
    pub activity_format: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 20,
            fetch_timeout: Duration::from_secs(30),
            progress_batch: 25,
            activity_format: DEFAULT_ACTIVITY_FORMAT.to_string(),
        }
    }
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.scan.concurrency,
            fetch_timeout: Duration::from_secs(config.scan.fetch_timeout_secs),
            progress_batch: config.scan.progress_batch,
            activity_format: config.source.activity_format.clone(),
        }
    }
}

/// Outcome of a completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Entities listed by the source
    pub total: usize,

    /// Entities in the committed snapshot
    pub fetched: usize,

    /// Entities skipped because their detail fetch failed
    pub failed: usize,

    pub alerts: usize,

    pub dispatch: DispatchSummary,

    /// `false` if the alert episodes could not be persisted this cycle; its
    /// alerts are then withheld and re-evaluated by the next scan
    pub alert_states_persisted: bool,
}

#[derive(Debug)]
pub enum ScanError {
    /// Another scan holds the scan lock
    AlreadyRunning,

    /// Cancelled before commit; nothing was changed
    Cancelled,

    /// The population listing could not be retrieved
    Population(FetchError),

    /// The new snapshot could not be persisted; the previous one stays current
    Persistence(StorageError),

    /// The scanner actor is no longer running
    Stopped,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::AlreadyRunning => write!(f, "a scan is already running"),
            ScanError::Cancelled => write!(f, "scan cancelled"),
            ScanError::Population(e) => write!(f, "failed to list population: {}", e),
            ScanError::Persistence(e) => write!(f, "failed to commit snapshot: {}", e),
            ScanError::Stopped => write!(f, "scanner is not running"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Population(e) => Some(e),
            ScanError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

/// Drives scan cycles; owns the alert tracker and the scan lock
pub struct ScanOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<SnapshotStore>,
    tracker: Mutex<AlertStateTracker>,
    alerts: AlertManager,
    clock: Arc<dyn Clock>,
    settings: ScanSettings,

    /// Held for the whole cycle; at most one scan at a time
    scan_lock: Mutex<()>,

    progress_tx: broadcast::Sender<ScanProgress>,
}

impl ScanOrchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<SnapshotStore>,
        tracker: AlertStateTracker,
        alerts: AlertManager,
        clock: Arc<dyn Clock>,
        settings: ScanSettings,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(64);

        Self {
            fetcher,
            store,
            tracker: Mutex::new(tracker),
            alerts,
            clock,
            settings,
            scan_lock: Mutex::new(()),
            progress_tx,
        }
    }

    /// Receive progress reports of subsequent scans
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_lock.try_lock().is_err()
    }

    /// Current alert episodes in persisted form
    pub async fn alert_states(&self) -> Vec<AlertStateRecord> {
        self.tracker.lock().await.records()
    }

    /// Run one full scan cycle.
    ///
    /// Returns [`ScanError::AlreadyRunning`] immediately if another scan holds
    /// the lock.
    #[instrument(skip_all)]
    pub async fn run_scan(&self, cancel: &CancellationToken) -> Result<ScanReport, ScanError> {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            debug!("scan requested while another is running");
            return Err(ScanError::AlreadyRunning);
        };

        let started_at = self.clock.now();
        info!("starting scan");

        let population = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            population = self.fetcher.list_population() => {
                population.map_err(ScanError::Population)?
            }
        };
        let total = population.len();
        info!("population lists {} entities", total);

        let entities = self.fetch_all(population, cancel).await?;
        let failed = total - entities.len();

        let snapshot = Snapshot::new(self.clock.now(), entities);
        let committed = self
            .store
            .commit(snapshot)
            .await
            .map_err(ScanError::Persistence)?;

        let mut tracker = self.tracker.lock().await;
        let previous = tracker.clone();
        let events = tracker.evaluate(&committed, committed.timestamp());

        // dispatch only once the fired thresholds are durable
        let alert_states_persisted = match self.store.save_alert_states(&tracker.records()).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "failed to persist alert states, withholding {} alerts until the next scan: {}",
                    events.len(),
                    e
                );
                *tracker = previous;
                false
            }
        };
        drop(tracker);

        let (events, dispatch) = if alert_states_persisted {
            let dispatch = self.alerts.dispatch(&events).await;
            (events, dispatch)
        } else {
            (Vec::new(), DispatchSummary::default())
        };

        let report = ScanReport {
            started_at,
            finished_at: self.clock.now(),
            total,
            fetched: committed.len(),
            failed,
            alerts: events.len(),
            dispatch,
            alert_states_persisted,
        };
        info!(
            "scan finished: {} entities, {} failed, {} alerts",
            report.fetched, report.failed, report.alerts
        );
        Ok(report)
    }

    /// Fetch detail for every listed entity, at most `concurrency` at a time.
    ///
    /// Results are returned in listing order; failed items are left out.
    async fn fetch_all(
        &self,
        population: Vec<RawEntityRef>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Entity>, ScanError> {
        let fetcher = &self.fetcher;
        let fetch_timeout = self.settings.fetch_timeout;
        let mut counter = ProgressCounter::new(population.len(), self.settings.progress_batch);

        let mut fetches = stream::iter(population.into_iter().enumerate())
            .map(|(index, raw)| async move {
                let result = match timeout(fetch_timeout, fetcher.fetch_detail(&raw)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout),
                };
                (index, raw, result)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        let mut fetched = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        "scan cancelled after {} of {} items, discarding",
                        counter.completed(),
                        counter.total()
                    );
                    return Err(ScanError::Cancelled);
                }
                next = fetches.next() => next,
            };
            let Some((index, raw, result)) = next else {
                break;
            };

            let success = match result {
                Ok(detail) => {
                    fetched.push((index, self.build_entity(raw, detail)));
                    true
                }
                Err(e) => {
                    error!("{}: failed to fetch detail, skipping: {}", raw.id, e);
                    false
                }
            };

            if let Some(progress) = counter.record(success) {
                info!(
                    "scan progress {}/{} ({} failed), about {}s remaining",
                    progress.completed,
                    progress.total,
                    progress.failed,
                    progress.eta.unwrap_or_default().as_secs()
                );
                let _ = self.progress_tx.send(progress);
            }
        }

        fetched.sort_by_key(|(index, _)| *index);
        Ok(fetched.into_iter().map(|(_, entity)| entity).collect())
    }

    /// Merge listing and detail; detail values win
    fn build_entity(&self, raw: RawEntityRef, detail: RawDetail) -> Entity {
        let last_activity = match detail.last_activity_text.as_deref() {
            Some(text) => match parse_last_activity(text, &self.settings.activity_format) {
                Ok(instant) => Some(instant),
                Err(e) => {
                    warn!("{}: {}, treating activity as unknown", raw.id, e);
                    None
                }
            },
            None => {
                debug!("{}: no last activity found", raw.id);
                None
            }
        };

        let mut attributes = raw.attributes;
        attributes.extend(detail.attributes);

        Entity {
            id: raw.id,
            owner: detail.owner.or(raw.owner),
            last_activity,
            attributes,
            external_ref: raw.external_ref,
        }
    }
}
