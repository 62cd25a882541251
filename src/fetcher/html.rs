//! Scraper for HTML table listings
//!
//! ## Listing Layout
//!
//! ```text
//! <tr><td><a href="/house/1">Harbour Street 1</a></td><td>42</td><td>Knight</td>...Logowanie: 03.10.2026 (18:45)</tr>
//!      └── id (+ detail link) ──────────────────────┘ └ size ┘ └ owner ┘      └── activity label + timestamp
//! ```
//!
//! Columns are mapped by [`SourceConfig::columns`]. Rows with fewer cells than
//! configured columns (headers, separators) are skipped. If the id cell links
//! somewhere, that link is the external reference and the detail page;
//! otherwise the listing row itself is used as detail.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, instrument, trace};

use super::{FetchError, Fetcher, RawDetail, RawEntityRef, text_after_label};
use crate::config::SourceConfig;

static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid row regex"));

static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("valid cell regex"));

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("valid link regex")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

static SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const ID_COLUMN: &str = "id";
const OWNER_COLUMN: &str = "owner";
const IGNORED_COLUMN: &str = "-";

/// Fetcher scraping an HTML listing page and optional detail pages
#[derive(Debug, Clone)]
pub struct HtmlFetcher {
    client: Client,
    listing_url: Url,
    columns: Vec<String>,
    activity_label: String,
}

impl HtmlFetcher {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let listing_url = Url::parse(&config.url)?;

        Ok(Self {
            client,
            listing_url,
            columns: config.columns.clone(),
            activity_label: config.activity_label.clone(),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        trace!("requesting {url}");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    fn parse_listing(&self, body: &str) -> Vec<RawEntityRef> {
        ROW.captures_iter(body)
            .filter_map(|row| self.parse_row(&row[1]))
            .collect()
    }

    fn parse_row(&self, row: &str) -> Option<RawEntityRef> {
        let cells: Vec<&str> = CELL
            .captures_iter(row)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if cells.is_empty() || cells.len() < self.columns.len() {
            return None;
        }

        let mut entity = RawEntityRef::default();
        for (column, cell) in self.columns.iter().zip(&cells) {
            let text = strip_tags(cell);
            match column.as_str() {
                ID_COLUMN => {
                    entity.id = text;
                    entity.external_ref = LINK
                        .captures(cell)
                        .and_then(|link| self.listing_url.join(decode_entities(&link[1]).as_str()).ok())
                        .map(String::from);
                }
                OWNER_COLUMN => entity.owner = Some(text).filter(|owner| !owner.is_empty()),
                IGNORED_COLUMN => {}
                attribute => {
                    if !text.is_empty() {
                        entity.attributes.insert(attribute.to_string(), text);
                    }
                }
            }
        }

        if entity.id.is_empty() {
            return None;
        }

        entity.detail_url = entity.external_ref.clone();
        entity.listing_text = Some(strip_tags(row));
        Some(entity)
    }

    fn parse_detail(&self, text: &str) -> RawDetail {
        RawDetail {
            owner: None,
            last_activity_text: text_after_label(text, &self.activity_label).map(str::to_string),
            attributes: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl Fetcher for HtmlFetcher {
    #[instrument(skip(self), fields(url = %self.listing_url))]
    async fn list_population(&self) -> Result<Vec<RawEntityRef>, FetchError> {
        let body = self.get_text(self.listing_url.as_str()).await?;
        let entities = self.parse_listing(&body);

        let has_cells = ROW
            .captures_iter(&body)
            .any(|row| CELL.is_match(&row[1]));
        if entities.is_empty() && has_cells {
            return Err(FetchError::Malformed(
                "listing has rows but none matched the configured columns".to_string(),
            ));
        }

        debug!("listing contains {} entities", entities.len());
        Ok(entities)
    }

    #[instrument(skip_all, fields(entity = %entity.id))]
    async fn fetch_detail(&self, entity: &RawEntityRef) -> Result<RawDetail, FetchError> {
        let text = match &entity.detail_url {
            Some(url) => strip_tags(&self.get_text(url).await?),
            None => entity.listing_text.clone().unwrap_or_default(),
        };

        Ok(self.parse_detail(&text))
    }
}

/// Visible text of an HTML fragment, whitespace collapsed
fn strip_tags(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = decode_entities(&text);
    SPACE.replace_all(text.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
