//! Read-only views over the committed snapshot
//!
//! Idle durations are computed live against the clock, so results move
//! forward between scans. Nothing here mutates the snapshot or the alert
//! episodes, and nothing triggers a scan.

pub mod filter;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::monitors::idle::{IdleEvaluation, ThresholdTable};
use crate::storage::SnapshotStore;

pub use filter::{FilterExpr, FilterParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// No snapshot has been committed yet
    NotYetAvailable,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::NotYetAvailable => write!(f, "no snapshot has been built yet"),
        }
    }
}

impl std::error::Error for QueryError {}

/// An owned entity with known idle duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibleEntity {
    pub id: String,
    pub owner: String,

    #[serde(rename = "idle_secs", serialize_with = "serialize_secs")]
    pub idle: Duration,

    pub last_activity: DateTime<Utc>,

    /// Highest threshold the idle duration has reached
    pub threshold: Option<String>,

    pub attributes: BTreeMap<String, String>,
    pub external_ref: Option<String>,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_seconds())
}

/// Summary of the committed snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub scanned_at: DateTime<Utc>,
    pub total: usize,
    pub owned: usize,

    /// Owned entities whose last activity could not be determined
    pub unknown_activity: usize,

    /// Owned entities idle at least the eligibility cutoff
    pub eligible: usize,

    pub cutoff_secs: i64,
}

pub struct QueryEngine {
    store: Arc<SnapshotStore>,
    clock: Arc<dyn Clock>,
    table: ThresholdTable,
    cutoff: Duration,
}

impl QueryEngine {
    /// Without an explicit `cutoff`, the smallest threshold is used
    pub fn new(
        store: Arc<SnapshotStore>,
        clock: Arc<dyn Clock>,
        table: ThresholdTable,
        cutoff: Option<Duration>,
    ) -> Self {
        let cutoff = cutoff.unwrap_or(table.first().after);
        Self {
            store,
            clock,
            table,
            cutoff,
        }
    }

    /// Eligibility cutoff used by [`QueryEngine::status`]
    pub fn cutoff(&self) -> Duration {
        self.cutoff
    }

    pub fn status(&self) -> Result<StatusReport, QueryError> {
        let snapshot = self.store.current().ok_or(QueryError::NotYetAvailable)?;
        let now = self.clock.now();

        let mut report = StatusReport {
            scanned_at: snapshot.timestamp(),
            total: snapshot.len(),
            owned: 0,
            unknown_activity: 0,
            eligible: 0,
            cutoff_secs: self.cutoff.num_seconds(),
        };

        for entity in snapshot.entities() {
            match IdleEvaluation::evaluate(entity, now, &self.table) {
                IdleEvaluation::Unowned => {}
                IdleEvaluation::Unknown => {
                    report.owned += 1;
                    report.unknown_activity += 1;
                }
                IdleEvaluation::Idle { duration, .. } => {
                    report.owned += 1;
                    if duration >= self.cutoff {
                        report.eligible += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Owned entities idle at least `min_idle`, most idle first, ties by id.
    ///
    /// Entities with unknown activity are never listed.
    pub fn list_eligible(
        &self,
        min_idle: Duration,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<EligibleEntity>, QueryError> {
        let snapshot = self.store.current().ok_or(QueryError::NotYetAvailable)?;
        let now = self.clock.now();

        let mut eligible: Vec<EligibleEntity> = snapshot
            .entities()
            .iter()
            .filter(|entity| filter.is_none_or(|filter| filter.matches(entity)))
            .filter_map(|entity| {
                let evaluation = IdleEvaluation::evaluate(entity, now, &self.table);
                let idle = evaluation.duration().filter(|idle| *idle >= min_idle)?;

                Some(EligibleEntity {
                    id: entity.id.clone(),
                    owner: entity.owner.clone()?,
                    idle,
                    last_activity: entity.last_activity?,
                    threshold: evaluation.highest().map(|t| t.kind.clone()),
                    attributes: entity.attributes.clone(),
                    external_ref: entity.external_ref.clone(),
                })
            })
            .collect();

        eligible.sort_by(|a, b| b.idle.cmp(&a.idle).then_with(|| a.id.cmp(&b.id)));
        Ok(eligible)
    }

    /// The `n` most idle owned entities with known activity
    pub fn top_n(
        &self,
        n: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<EligibleEntity>, QueryError> {
        let mut ranked = self.list_eligible(Duration::zero(), filter)?;
        ranked.truncate(n);
        Ok(ranked)
    }
}
