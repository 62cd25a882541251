use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Deserializer};
use tracing::trace;

use crate::monitors::idle::{Threshold, ThresholdTable};
use crate::util::{get_api_token, get_discord_url, parse_duration};

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// Single JSON file, rewritten atomically after every scan
    Json {
        #[serde(default = "default_json_path")]
        path: PathBuf,
    },

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Json {
            path: default_json_path(),
        }
    }
}

fn default_json_path() -> PathBuf {
    PathBuf::from("./cache.json")
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./reclaim.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Ordered idle thresholds (validated on load)
    pub thresholds: Vec<ThresholdConfig>,

    /// Default alert destination for all thresholds
    pub alert: Option<Alert>,

    /// Storage configuration (optional - defaults to a JSON cache file)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub query: QueryConfig,

    /// Query API (optional - disabled when absent)
    pub api: Option<ApiSettings>,
}

/// Where and how the population listing is scraped
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// URL of the listing page
    pub url: String,

    /// Meaning of each table column: `id`, `owner`, `-` (ignored) or an attribute name
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,

    /// Text preceding the last-activity timestamp
    #[serde(default = "default_activity_label")]
    pub activity_label: String,

    /// chrono format of the last-activity timestamp (interpreted as UTC)
    #[serde(default = "default_activity_format")]
    pub activity_format: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_columns() -> Vec<String> {
    vec!["id".to_string(), "size".to_string(), "owner".to_string()]
}

fn default_activity_label() -> String {
    "Logowanie:".to_string()
}

/// Format of the last-login text on the reference source
pub const DEFAULT_ACTIVITY_FORMAT: &str = "%d.%m.%Y (%H:%M)";

fn default_activity_format() -> String {
    DEFAULT_ACTIVITY_FORMAT.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum number of detail requests in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Report progress after this many completed items
    #[serde(default = "default_progress_batch")]
    pub progress_batch: usize,

    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            progress_batch: default_progress_batch(),
            run_on_start: default_run_on_start(),
        }
    }
}

fn default_interval() -> u64 {
    3600
}

fn default_concurrency() -> usize {
    20
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_progress_batch() -> usize {
    25
}

fn default_run_on_start() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    /// Idle duration at which this threshold is crossed (e.g. `14d-4h`)
    #[serde(deserialize_with = "deserialize_duration")]
    pub after: Duration,

    /// Alert kind reported when crossed
    pub kind: String,

    /// Destination override for this threshold
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    /// Default minimum idle duration for eligibility listings
    /// (defaults to the smallest threshold)
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub eligibility_cutoff: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    pub token: Option<String>,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_enable_cors() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|raw| parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

impl Config {
    /// Build the validated threshold table
    pub fn threshold_table(&self) -> anyhow::Result<ThresholdTable> {
        let thresholds = self
            .thresholds
            .iter()
            .map(|t| Threshold::new(t.kind.clone(), t.after))
            .collect();
        ThresholdTable::new(thresholds).map_err(|e| anyhow::anyhow!("invalid thresholds: {e}"))
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Apply overrides from the environment
    pub fn apply_env(&mut self) {
        if let Some(url) = get_discord_url() {
            trace!("using Discord destination from environment");
            let user_id = match &self.alert {
                Some(Alert::Discord(discord)) => discord.user_id.clone(),
                _ => None,
            };
            self.alert = Some(Alert::Discord(Discord { url, user_id }));
        }

        if let (Some(token), Some(api)) = (get_api_token(), self.api.as_mut()) {
            trace!("using API token from environment");
            api.token = Some(token);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.threshold_table()?;

        if self.scan.concurrency == 0 {
            anyhow::bail!("scan.concurrency must be at least 1");
        }
        if self.scan.progress_batch == 0 {
            anyhow::bail!("scan.progress_batch must be at least 1");
        }
        if self.scan.interval_secs == 0 {
            anyhow::bail!("scan.interval_secs must be at least 1");
        }
        if !self.source.columns.iter().any(|c| c == "id") {
            anyhow::bail!("source.columns must contain an 'id' column");
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let mut config: Config = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.apply_env();
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
