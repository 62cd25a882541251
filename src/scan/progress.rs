//! Scan progress and time-remaining estimation

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Snapshot of an in-flight scan, published after every progress batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    /// Items finished so far, failures included
    pub completed: usize,

    pub total: usize,

    pub failed: usize,

    #[serde(with = "secs")]
    pub elapsed: Duration,

    /// Estimated time remaining, `None` before the first item completes
    #[serde(with = "opt_secs")]
    pub eta: Option<Duration>,
}

impl ScanProgress {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Linear extrapolation: `elapsed / completed * remaining`
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed);
    Some(elapsed.mul_f64(remaining as f64 / completed as f64))
}

/// Counts completed items and decides when a report is due
#[derive(Debug)]
pub struct ProgressCounter {
    started: Instant,
    total: usize,
    batch: usize,
    completed: usize,
    failed: usize,
}

impl ProgressCounter {
    pub fn new(total: usize, batch: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
            batch: batch.max(1),
            completed: 0,
            failed: 0,
        }
    }

    /// Record one finished item; returns a report at every batch boundary
    /// and when the last item completes
    pub fn record(&mut self, success: bool) -> Option<ScanProgress> {
        self.completed += 1;
        if !success {
            self.failed += 1;
        }

        if self.completed % self.batch == 0 || self.completed == self.total {
            Some(self.report())
        } else {
            None
        }
    }

    pub fn report(&self) -> ScanProgress {
        let elapsed = self.started.elapsed();
        ScanProgress {
            completed: self.completed,
            total: self.total,
            failed: self.failed,
            elapsed,
            eta: estimate_remaining(elapsed, self.completed, self.total),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

mod opt_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }
}
