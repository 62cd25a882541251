//! ScannerActor - schedules scan cycles
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ──┐
//!              ├──► spawn run_scan ──► ScanProgress events ──► [subscribers]
//! ScanNow ─────┘         │
//!                        └──► ScanReport (to the ScanNow caller)
//! ```
//!
//! Scans run as separate tasks so the actor keeps answering commands while
//! one is in flight. The orchestrator's scan lock guarantees only one of them
//! ever does work; a tick that lands on a running scan is skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::messages::{ScanCommand, ScanProgress};
use crate::scan::{ScanError, ScanOrchestrator, ScanReport};

/// When scans are scheduled
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub interval: Duration,

    /// Scan immediately on spawn instead of one interval later
    pub run_on_start: bool,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            run_on_start: true,
        }
    }
}

/// Actor owning the scan timer
pub struct ScannerActor {
    orchestrator: Arc<ScanOrchestrator>,

    command_rx: mpsc::Receiver<ScanCommand>,

    /// Cancelled on shutdown; every scan observes it
    cancel: CancellationToken,

    schedule: Schedule,

    scans: JoinSet<()>,
}

impl ScannerActor {
    pub fn new(
        orchestrator: Arc<ScanOrchestrator>,
        command_rx: mpsc::Receiver<ScanCommand>,
        cancel: CancellationToken,
        schedule: Schedule,
    ) -> Self {
        Self {
            orchestrator,
            command_rx,
            cancel,
            schedule,
            scans: JoinSet::new(),
        }
    }

    /// Run the actor's main loop until shutdown or until every handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scanner actor");

        let period = self.schedule.interval.max(Duration::from_secs(1));
        let first = if self.schedule.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.orchestrator.is_scanning() {
                        debug!("previous scan still running, skipping tick");
                    } else {
                        self.start_scan(None);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ScanCommand::ScanNow { respond_to }) => {
                            debug!("received ScanNow command");
                            self.start_scan(Some(respond_to));
                        }

                        Some(ScanCommand::UpdateInterval { interval_secs }) => {
                            let period = Duration::from_secs(interval_secs.max(1));
                            info!("updating scan interval to {}s", period.as_secs());
                            ticker = interval_at(Instant::now() + period, period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }

                        Some(ScanCommand::Shutdown { done }) => {
                            debug!("received shutdown command");
                            self.stop().await;
                            let _ = done.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            self.stop().await;
                            break;
                        }
                    }
                }

                Some(joined) = self.scans.join_next(), if !self.scans.is_empty() => {
                    if let Err(e) = joined {
                        error!("scan task panicked: {}", e);
                    }
                }
            }
        }

        debug!("scanner actor stopped");
    }

    fn start_scan(&mut self, respond_to: Option<oneshot::Sender<Result<ScanReport, ScanError>>>) {
        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();

        self.scans.spawn(async move {
            let result = orchestrator.run_scan(&cancel).await;
            match &result {
                Ok(_) => {}
                Err(ScanError::AlreadyRunning) => debug!("scan already running"),
                Err(ScanError::Cancelled) => info!("scan cancelled"),
                Err(e) => error!("scan failed: {}", e),
            }

            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(result);
            }
        });
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.scans.join_next().await {
            if let Err(e) = joined {
                error!("scan task panicked: {}", e);
            }
        }
    }
}

/// Handle for controlling a ScannerActor
///
/// Cheap to clone and shared between the binary and the API.
#[derive(Clone)]
pub struct ScannerHandle {
    sender: mpsc::Sender<ScanCommand>,
    orchestrator: Arc<ScanOrchestrator>,
}

impl ScannerHandle {
    /// Spawn the actor as a tokio task
    pub fn spawn(orchestrator: Arc<ScanOrchestrator>, schedule: Schedule) -> Self {
        Self::spawn_with_token(orchestrator, schedule, CancellationToken::new())
    }

    /// Spawn with a caller-provided cancellation token, e.g. a child of the
    /// process shutdown token
    pub fn spawn_with_token(
        orchestrator: Arc<ScanOrchestrator>,
        schedule: Schedule,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ScannerActor::new(orchestrator.clone(), cmd_rx, cancel, schedule);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            orchestrator,
        }
    }

    /// Run a scan now and wait for its report
    pub async fn scan_now(&self) -> Result<ScanReport, ScanError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScanCommand::ScanNow { respond_to: tx })
            .await
            .map_err(|_| ScanError::Stopped)?;

        rx.await.map_err(|_| ScanError::Stopped)?
    }

    pub async fn update_interval(&self, interval_secs: u64) -> anyhow::Result<()> {
        self.sender
            .send(ScanCommand::UpdateInterval { interval_secs })
            .await
            .map_err(|_| anyhow::anyhow!("failed to send UpdateInterval command"))?;
        Ok(())
    }

    /// Cancel the running scan (if any) and stop the actor
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScanCommand::Shutdown { done: tx })
            .await
            .map_err(|_| anyhow::anyhow!("failed to send Shutdown command"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("scanner stopped before acknowledging shutdown"))?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.orchestrator.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.orchestrator.is_scanning()
    }
}
