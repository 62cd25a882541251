pub mod actors;
pub mod alerts;
pub mod api;
pub mod clock;
pub mod config;
pub mod discord;
pub mod fetcher;
pub mod monitors;
pub mod query;
pub mod scan;
pub mod storage;
pub mod util;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A claimable resource as observed during one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique within a snapshot
    pub id: String,

    /// Current owner (`None` = unowned, never eligible)
    pub owner: Option<String>,

    /// Last time the owner was seen active (`None` = unknown)
    pub last_activity: Option<DateTime<Utc>>,

    /// Classification attributes, only used for filtering
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Opaque reference to the entity in the source (e.g. a map link)
    pub external_ref: Option<String>,
}

impl Entity {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            owner: None,
            last_activity: None,
            attributes: BTreeMap::new(),
            external_ref: None,
        }
    }

    pub fn with_owner(mut self, owner: impl ToString) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn with_last_activity(mut self, last_activity: DateTime<Utc>) -> Self {
        self.last_activity = Some(last_activity);
        self
    }

    pub fn with_attribute(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl ToString) -> Self {
        self.external_ref = Some(external_ref.to_string());
        self
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }
}

/// Metadata describing the scan that produced a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// When the scan completed
    pub timestamp: DateTime<Utc>,

    /// Number of entities in the snapshot
    pub total_count: usize,
}

/// Immutable, fully fetched view of the population as of one scan.
///
/// Entity identifiers are unique; construction drops later duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    metadata: ScanMetadata,
    entities: Vec<Entity>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>, entities: Vec<Entity>) -> Self {
        let mut seen = HashSet::with_capacity(entities.len());
        let entities = entities
            .into_iter()
            .filter(|entity| {
                let fresh = seen.insert(entity.id.clone());
                if !fresh {
                    warn!("dropping duplicate entity '{}' from snapshot", entity.id);
                }
                fresh
            })
            .collect::<Vec<_>>();

        Self {
            metadata: ScanMetadata {
                timestamp,
                total_count: entities.len(),
            },
            entities,
        }
    }

    pub fn metadata(&self) -> &ScanMetadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}
