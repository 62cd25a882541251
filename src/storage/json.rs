//! JSON file storage backend
//!
//! Keeps the whole state in one document (see [`super::schema`]). Writes go to
//! a uniquely named, fsynced temporary file next to the target which is then
//! renamed over it, so a crash mid-write leaves the previous file intact.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{STATE_VERSION, SnapshotRecord, StateDocument};
use crate::Snapshot;
use crate::alerts::tracker::AlertStateRecord;

pub struct JsonFileBackend {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl JsonFileBackend {
    /// Open the state file at `path`; a missing file is an empty state
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let document = match fs::read_to_string(&path).await {
            Ok(content) => {
                let document: StateDocument = serde_json::from_str(&content)?;
                if document.version != STATE_VERSION {
                    return Err(StorageError::Corrupt(format!(
                        "unsupported state version {} (expected {})",
                        document.version, STATE_VERSION
                    )));
                }
                info!("loaded state from {}", path.display());
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no state file at {}, starting empty", path.display());
                StateDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, document: &StateDocument) -> StorageResult<()> {
        let content = serde_json::to_vec_pretty(document)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || replace_file(&path, &content))
            .await
            .map_err(std::io::Error::other)??;

        debug!("state written to {}", self.path.display());
        Ok(())
    }
}

/// Atomically replace `path` with `content`
fn replace_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StorageBackend for JsonFileBackend {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut document = self.document.lock().await;

        let mut updated = document.clone();
        updated.snapshot = Some(SnapshotRecord::from(snapshot));
        self.write(&updated).await?;

        *document = updated;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        let document = self.document.lock().await;
        Ok(document.snapshot.clone().map(SnapshotRecord::into_snapshot))
    }

    async fn save_alert_states(&self, records: &[AlertStateRecord]) -> StorageResult<()> {
        let mut document = self.document.lock().await;

        let mut updated = document.clone();
        updated.alert_states = records.to_vec();
        self.write(&updated).await?;

        *document = updated;
        Ok(())
    }

    async fn load_alert_states(&self) -> StorageResult<Vec<AlertStateRecord>> {
        Ok(self.document.lock().await.alert_states.clone())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let document = self.document.lock().await;
        let mut metadata = HashMap::from([
            ("backend".to_string(), "json".to_string()),
            ("path".to_string(), self.path.display().to_string()),
        ]);
        if let Some(snapshot) = &document.snapshot {
            metadata.insert(
                "entities".to_string(),
                snapshot.metadata.total_count.to_string(),
            );
        }

        let writable = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => fs::metadata(dir).await.is_ok(),
            None => true,
        };
        if !writable {
            warn!("state directory of {} is missing", self.path.display());
        }

        Ok(HealthStatus {
            healthy: writable,
            message: if writable {
                "JSON file backend operational".to_string()
            } else {
                "state directory is missing".to_string()
            },
            metadata,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing JSON file backend");
        Ok(())
    }
}
