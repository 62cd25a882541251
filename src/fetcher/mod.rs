//! Population source abstraction
//!
//! A [`Fetcher`] lists the population and fetches per-entity detail. The scan
//! orchestrator only talks to this trait; [`html::HtmlFetcher`] is the scraper
//! used in production.

pub mod html;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

pub use html::HtmlFetcher;

/// One entry of the population listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntityRef {
    pub id: String,
    pub owner: Option<String>,

    /// Opaque link carried into the snapshot
    pub external_ref: Option<String>,

    /// Where to fetch detail from (`None` = listing is the detail)
    pub detail_url: Option<String>,

    /// Text of the listing entry, used when there is no detail page
    pub listing_text: Option<String>,

    pub attributes: BTreeMap<String, String>,
}

/// Per-entity detail; present values override the listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDetail {
    pub owner: Option<String>,

    /// Text holding the last-activity timestamp, starting at the timestamp
    pub last_activity_text: Option<String>,

    pub attributes: BTreeMap<String, String>,
}

/// Errors while talking to the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure
    Http(String),

    /// Source answered with a non-success status
    Status(u16),

    /// Request did not finish in time
    Timeout,

    /// Response could not be interpreted
    Malformed(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Http(msg) => write!(f, "request failed: {}", msg),
            FetchError::Status(status) => write!(f, "source responded with status {}", status),
            FetchError::Timeout => write!(f, "request timed out"),
            FetchError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the full population in one call
    async fn list_population(&self) -> Result<Vec<RawEntityRef>, FetchError>;

    /// Retrieve detail for one entity
    async fn fetch_detail(&self, entity: &RawEntityRef) -> Result<RawDetail, FetchError>;
}

/// Last-activity text that does not match the expected format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub text: String,
    pub format: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' does not match activity format '{}'",
            self.text, self.format
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a last-activity timestamp at the start of `text`, as UTC.
///
/// Anything after the timestamp is ignored.
pub fn parse_last_activity(text: &str, format: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_and_remainder(text.trim(), format)
        .map(|(naive, _)| naive.and_utc())
        .map_err(|_| ParseError {
            text: text.trim().to_string(),
            format: format.to_string(),
        })
}

/// Text following `label`, if the label occurs in `text`
pub fn text_after_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let start = text.find(label)? + label.len();
    Some(text[start..].trim_start())
}
