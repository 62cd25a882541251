//! Message types for actor communication
//!
//! 1. **Commands**: Request/response messages sent to the scanner via mpsc
//! 2. **Events**: Scan progress broadcast to any number of subscribers

use tokio::sync::oneshot;

use crate::scan::{ScanError, ScanReport};

pub use crate::scan::ScanProgress;

/// Commands that can be sent to a [`super::scanner::ScannerActor`]
#[derive(Debug)]
pub enum ScanCommand {
    /// Start a scan now, bypassing the interval timer.
    ///
    /// Answered with [`ScanError::AlreadyRunning`] if a scan is in progress.
    ScanNow {
        respond_to: oneshot::Sender<Result<ScanReport, ScanError>>,
    },

    /// Change the scan interval; the next scheduled scan is one new interval away
    UpdateInterval { interval_secs: u64 },

    /// Cancel any running scan and stop the actor
    ///
    /// `done` fires once the running scan has been abandoned.
    Shutdown { done: oneshot::Sender<()> },
}
