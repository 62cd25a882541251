//! Snapshot storage
//!
//! [`SnapshotStore`] holds the single committed snapshot readers see, backed
//! by a [`StorageBackend`] so the snapshot and the alert episodes survive
//! restarts.
//!
//! ## Commit Protocol
//!
//! ```text
//! scan done ──► backend.save_snapshot ──ok──► swap in-memory pointer ──► readers see it
//!                        │
//!                        └──err──► previous snapshot stays current
//! ```
//!
//! Readers clone an `Arc` and never observe a partially written snapshot.
//!
//! ## Backends
//!
//! - **JSON file** (default): One document, atomically replaced
//! - **SQLite**: Embedded database (feature `storage-sqlite`)
//! - **In-Memory**: No persistence, for testing

pub mod backend;
pub mod error;
pub mod json;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use json::JsonFileBackend;
pub use memory::MemoryBackend;

use crate::Snapshot;
use crate::alerts::tracker::AlertStateRecord;
use crate::config::StorageConfig;

/// Open the backend selected by the configuration
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, state is lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        StorageConfig::Json { path } => Ok(Arc::new(JsonFileBackend::open(path).await?)),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

/// The current committed snapshot plus its durable backing
pub struct SnapshotStore {
    current: RwLock<Option<Arc<Snapshot>>>,
    backend: Arc<dyn StorageBackend>,

    /// Serializes commits so backend and pointer never disagree
    writer: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            current: RwLock::new(None),
            backend,
            writer: Mutex::new(()),
        }
    }

    /// Store without persistence
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Restore the last persisted snapshot as current, if any
    #[instrument(skip(self))]
    pub async fn load(&self) -> StorageResult<Option<Arc<Snapshot>>> {
        let _guard = self.writer.lock().await;

        let loaded = self.backend.load_snapshot().await?.map(Arc::new);
        if let Some(snapshot) = &loaded {
            info!(
                "restored snapshot of {} entities from {}",
                snapshot.len(),
                snapshot.timestamp()
            );
            self.swap(snapshot.clone());
        }
        Ok(loaded)
    }

    /// Persist `snapshot` and make it current.
    ///
    /// On error the previously committed snapshot stays current.
    #[instrument(skip_all, fields(count = snapshot.len()))]
    pub async fn commit(&self, snapshot: Snapshot) -> StorageResult<Arc<Snapshot>> {
        let _guard = self.writer.lock().await;

        self.backend.save_snapshot(&snapshot).await?;

        let snapshot = Arc::new(snapshot);
        self.swap(snapshot.clone());
        debug!("committed snapshot taken at {}", snapshot.timestamp());
        Ok(snapshot)
    }

    /// Latest committed snapshot, `None` before the first commit
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn save_alert_states(&self, records: &[AlertStateRecord]) -> StorageResult<()> {
        self.backend.save_alert_states(records).await
    }

    pub async fn load_alert_states(&self) -> StorageResult<Vec<AlertStateRecord>> {
        self.backend.load_alert_states().await
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn swap(&self, snapshot: Arc<Snapshot>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }
}
