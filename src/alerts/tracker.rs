//! Per-entity idle episode tracking
//!
//! ## Episode State Machine
//!
//! ```text
//!                 idle >= first threshold
//!   ACTIVE ────────────────────────────────► IDLE(max fired)
//!     ▲                                          │
//!     │   last activity advances / owner changes │  idle >= next threshold
//!     └──────────────────────────────────────────┤  → fire it once
//!                                                ▼
//!                                          IDLE(next)
//! ```
//!
//! A threshold fires at most once per episode. Entities with unknown last
//! activity make no transition at all. Entities missing from
//! [`STALE_AFTER_MISSES`] consecutive snapshots are forgotten.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::{
    Snapshot,
    monitors::idle::{Threshold, ThresholdTable, idle_duration},
};

/// Consecutive snapshots an entity may be absent from before its state is dropped
pub const STALE_AFTER_MISSES: u32 = 2;

/// A newly crossed threshold for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub entity_id: String,
    pub owner: String,
    pub threshold: Threshold,
    #[serde(serialize_with = "serialize_secs")]
    pub idle: Duration,
    pub last_activity: DateTime<Utc>,
    pub external_ref: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_seconds())
}

/// Persisted form of one entity's episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStateRecord {
    pub entity_id: String,
    pub owner: String,
    pub episode_start: DateTime<Utc>,
    pub fired_thresholds: Vec<String>,
    #[serde(default)]
    pub missed_scans: u32,
}

#[derive(Debug, Clone)]
struct EpisodeState {
    owner: String,

    /// Last activity observed when the episode started
    episode_start: DateTime<Utc>,

    /// Fired kinds in the order they fired
    fired: Vec<String>,

    missed_scans: u32,
}

impl EpisodeState {
    fn start(owner: &str, last_activity: DateTime<Utc>) -> Self {
        Self {
            owner: owner.to_string(),
            episode_start: last_activity,
            fired: Vec::new(),
            missed_scans: 0,
        }
    }
}

/// Tracks which thresholds have fired for every entity's current episode
#[derive(Debug, Clone)]
pub struct AlertStateTracker {
    table: ThresholdTable,
    states: HashMap<String, EpisodeState>,
}

impl AlertStateTracker {
    pub fn new(table: ThresholdTable) -> Self {
        Self {
            table,
            states: HashMap::new(),
        }
    }

    /// Rebuild the tracker from persisted records
    pub fn from_records(table: ThresholdTable, records: Vec<AlertStateRecord>) -> Self {
        let states = records
            .into_iter()
            .map(|record| {
                (
                    record.entity_id,
                    EpisodeState {
                        owner: record.owner,
                        episode_start: record.episode_start,
                        fired: record.fired_thresholds,
                        missed_scans: record.missed_scans,
                    },
                )
            })
            .collect();

        Self { table, states }
    }

    /// Persistable view of all tracked episodes, sorted by entity id
    pub fn records(&self) -> Vec<AlertStateRecord> {
        let mut records: Vec<_> = self
            .states
            .iter()
            .map(|(id, state)| AlertStateRecord {
                entity_id: id.clone(),
                owner: state.owner.clone(),
                episode_start: state.episode_start,
                fired_thresholds: state.fired.clone(),
                missed_scans: state.missed_scans,
            })
            .collect();
        records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        records
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Thresholds already fired in the entity's current episode
    pub fn fired(&self, entity_id: &str) -> &[String] {
        self.states
            .get(entity_id)
            .map(|state| state.fired.as_slice())
            .unwrap_or_default()
    }

    /// Highest fired threshold of the current episode (`None` = ACTIVE)
    pub fn max_fired(&self, entity_id: &str) -> Option<&str> {
        self.fired(entity_id).last().map(String::as_str)
    }

    pub fn is_tracked(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Compare a committed snapshot against the current episodes.
    ///
    /// Returns one event per newly crossed threshold, in snapshot order and
    /// ascending threshold order per entity.
    #[instrument(skip_all, fields(entities = snapshot.len()))]
    pub fn evaluate(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for entity in snapshot.entities() {
            let Some(owner) = &entity.owner else {
                if self.states.remove(&entity.id).is_some() {
                    debug!("{}: became unowned, dropping episode", entity.id);
                }
                continue;
            };

            let Some(last_activity) = entity.last_activity else {
                // unknown activity: no transition, but the entity was seen
                if let Some(state) = self.states.get_mut(&entity.id) {
                    state.missed_scans = 0;
                }
                trace!("{}: last activity unknown, skipping", entity.id);
                continue;
            };

            let state = self
                .states
                .entry(entity.id.clone())
                .or_insert_with(|| EpisodeState::start(owner, last_activity));
            state.missed_scans = 0;

            if state.owner != *owner {
                debug!(
                    "{}: owner changed from '{}' to '{owner}', starting new episode",
                    entity.id, state.owner
                );
                *state = EpisodeState::start(owner, last_activity);
            } else if last_activity > state.episode_start {
                if !state.fired.is_empty() {
                    debug!("{}: owner returned, clearing {:?}", entity.id, state.fired);
                }
                *state = EpisodeState::start(owner, last_activity);
            }

            let Some(idle) = idle_duration(entity, now) else {
                continue;
            };

            for threshold in self.table.crossed(idle) {
                if state.fired.iter().any(|kind| *kind == threshold.kind) {
                    continue;
                }

                debug!(
                    "{}: idle {}s crossed '{}'",
                    entity.id,
                    idle.num_seconds(),
                    threshold.kind
                );
                state.fired.push(threshold.kind.clone());
                events.push(AlertEvent {
                    entity_id: entity.id.clone(),
                    owner: owner.clone(),
                    threshold: threshold.clone(),
                    idle,
                    last_activity,
                    external_ref: entity.external_ref.clone(),
                    attributes: entity.attributes.clone(),
                    observed_at: now,
                });
            }
        }

        let present: HashSet<&str> = snapshot.entities().iter().map(|e| e.id.as_str()).collect();
        self.states.retain(|id, state| {
            if present.contains(id.as_str()) {
                return true;
            }
            state.missed_scans += 1;
            if state.missed_scans >= STALE_AFTER_MISSES {
                debug!("{id}: missing from {} snapshots, evicting", state.missed_scans);
                return false;
            }
            true
        });

        events
    }
}
