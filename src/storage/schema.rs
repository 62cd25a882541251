//! Persisted state layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "snapshot": {
//!     "metadata": { "timestamp": "...", "total_count": 2 },
//!     "entities": [ { "id", "owner"?, "last_activity"?, "attributes", "external_ref"? }, ... ]
//!   },
//!   "alert_states": [ { "entity_id", "owner", "episode_start", "fired_thresholds": [...] }, ... ]
//! }
//! ```
//!
//! The JSON backend stores exactly this document; the SQLite backend stores
//! the same records as rows.

use serde::{Deserialize, Serialize};

use crate::alerts::tracker::AlertStateRecord;
use crate::{Entity, ScanMetadata, Snapshot};

pub const STATE_VERSION: u32 = 1;

/// Serialized snapshot: scan metadata plus entity records in snapshot order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub metadata: ScanMetadata,
    pub entities: Vec<Entity>,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            metadata: snapshot.metadata().clone(),
            entities: snapshot.entities().to_vec(),
        }
    }
}

impl SnapshotRecord {
    /// Rebuild the snapshot, re-checking identifier uniqueness
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot::new(self.metadata.timestamp, self.entities)
    }
}

/// Whole-state document of the JSON backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,

    #[serde(default)]
    pub snapshot: Option<SnapshotRecord>,

    #[serde(default)]
    pub alert_states: Vec<AlertStateRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            snapshot: None,
            alert_states: Vec::new(),
        }
    }
}
