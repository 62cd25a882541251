//! API request and response types

use serde::{Deserialize, Serialize};

use crate::query::{EligibleEntity, StatusReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage_healthy: bool,
    pub storage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: StatusReport,

    pub scanning: bool,
}

/// Query string of `GET /api/v1/eligible`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EligibleQuery {
    /// Duration such as `10d` or `14d-4h`; defaults to the eligibility cutoff
    pub min_idle: Option<String>,
    pub filter: Option<String>,
}

/// Query string of `GET /api/v1/top`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopQuery {
    pub n: Option<usize>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitiesResponse {
    pub count: usize,
    pub entities: Vec<EligibleEntity>,
}

impl From<Vec<EligibleEntity>> for EntitiesResponse {
    fn from(entities: Vec<EligibleEntity>) -> Self {
        Self {
            count: entities.len(),
            entities,
        }
    }
}
