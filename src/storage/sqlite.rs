//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked while a snapshot is replaced
//! - **Transactions**: A snapshot is replaced atomically or not at all
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::alerts::tracker::AlertStateRecord;
use crate::{Entity, Snapshot};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn decode_timestamp(text: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt(format!("timestamp '{text}': {e}")))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip_all, fields(count = snapshot.len()))]
    async fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entities").execute(&mut *tx).await?;

        for (position, entity) in snapshot.entities().iter().enumerate() {
            let attributes = serde_json::to_string(&entity.attributes)?;

            sqlx::query(
                r#"
                INSERT INTO entities (id, position, owner, last_activity, attributes, external_ref)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entity.id)
            .bind(position as i64)
            .bind(&entity.owner)
            .bind(entity.last_activity.map(Self::encode_timestamp))
            .bind(attributes)
            .bind(&entity.external_ref)
            .execute(&mut *tx)
            .await?;
        }

        let metadata = snapshot.metadata();
        sqlx::query(
            r#"
            INSERT INTO scan_metadata (id, timestamp, total_count)
            VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                timestamp = excluded.timestamp,
                total_count = excluded.total_count
            "#,
        )
        .bind(Self::encode_timestamp(metadata.timestamp))
        .bind(metadata.total_count as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("snapshot stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        let Some(meta) = sqlx::query("SELECT timestamp FROM scan_metadata WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let timestamp = Self::decode_timestamp(meta.get("timestamp"))?;

        let rows = sqlx::query(
            r#"
            SELECT id, owner, last_activity, attributes, external_ref
            FROM entities
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let entities = rows
            .into_iter()
            .map(|row| {
                let attributes: String = row.get("attributes");
                let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes)?;
                let last_activity = row
                    .get::<Option<&str>, _>("last_activity")
                    .map(Self::decode_timestamp)
                    .transpose()?;

                Ok(Entity {
                    id: row.get("id"),
                    owner: row.get("owner"),
                    last_activity,
                    attributes,
                    external_ref: row.get("external_ref"),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded snapshot of {} entities", entities.len());
        Ok(Some(Snapshot::new(timestamp, entities)))
    }

    #[instrument(skip_all, fields(count = records.len()))]
    async fn save_alert_states(&self, records: &[AlertStateRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM alert_states")
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO alert_states (entity_id, owner, episode_start, fired_thresholds, missed_scans)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.entity_id)
            .bind(&record.owner)
            .bind(Self::encode_timestamp(record.episode_start))
            .bind(serde_json::to_string(&record.fired_thresholds)?)
            .bind(record.missed_scans as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_alert_states(&self) -> StorageResult<Vec<AlertStateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, owner, episode_start, fired_thresholds, missed_scans
            FROM alert_states
            ORDER BY entity_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let fired: String = row.get("fired_thresholds");
                Ok(AlertStateRecord {
                    entity_id: row.get("entity_id"),
                    owner: row.get("owner"),
                    episode_start: Self::decode_timestamp(row.get("episode_start"))?,
                    fired_thresholds: serde_json::from_str(&fired)?,
                    missed_scans: row.get::<i64, _>("missed_scans").max(0) as u32,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT COUNT(*) AS count FROM entities")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());
                metadata.insert("entities".to_string(), row.get::<i64, _>("count").to_string());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
