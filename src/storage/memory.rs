//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without file or database dependencies
//! - Deployments that accept re-alerting after a restart
//!
//! All data is lost when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::StorageResult;
use crate::Snapshot;
use crate::alerts::tracker::AlertStateRecord;

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: Option<Snapshot>,
    alert_states: Vec<AlertStateRecord>,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        debug!("in-memory backend: storing snapshot of {} entities", snapshot.len());
        self.state.lock().await.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        Ok(self.state.lock().await.snapshot.clone())
    }

    async fn save_alert_states(&self, records: &[AlertStateRecord]) -> StorageResult<()> {
        self.state.lock().await.alert_states = records.to_vec();
        Ok(())
    }

    async fn load_alert_states(&self) -> StorageResult<Vec<AlertStateRecord>> {
        Ok(self.state.lock().await.alert_states.clone())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.lock().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "entities".to_string(),
                    state.snapshot.as_ref().map_or(0, Snapshot::len).to_string(),
                ),
                ("alert_states".to_string(), state.alert_states.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
