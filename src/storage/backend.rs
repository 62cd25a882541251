//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! persistence implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use crate::Snapshot;
use crate::alerts::tracker::AlertStateRecord;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable home of the committed snapshot and the alert episodes
///
/// Every save replaces what was stored before; there is no history. A save
/// either fully succeeds or leaves the previous state readable.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// scanner and the query side.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Replace the stored snapshot
    async fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// Last stored snapshot, `None` if nothing was ever saved
    async fn load_snapshot(&self) -> StorageResult<Option<Snapshot>>;

    /// Replace the stored alert episodes
    async fn save_alert_states(&self, records: &[AlertStateRecord]) -> StorageResult<()>;

    async fn load_alert_states(&self) -> StorageResult<Vec<AlertStateRecord>>;

    /// Lightweight check that the backend is usable
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Release resources and flush pending writes
    async fn close(&self) -> StorageResult<()>;
}
