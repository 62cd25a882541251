//! Alert delivery
//!
//! [`tracker`] decides *when* an alert is due; this module decides *where* it
//! goes and how it looks. Delivery is best-effort: a failed send is logged and
//! dropped, never retried.

pub mod tracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, trace};

use crate::config::{Alert, Config};
use crate::discord::{self, Message};
use crate::monitors::idle::ThresholdTable;
use crate::util::format_duration;

use tracker::AlertEvent;

/// An alert rendered for one destination
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: AlertEvent,

    /// Plain-text rendering (webhooks, logs)
    pub text: String,

    /// Rich rendering for Discord destinations
    pub discord: Message,
}

/// Delivers notifications to a destination
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &Alert, notification: &Notification) -> anyhow::Result<()>;
}

/// Notifier posting to Discord webhooks and generic JSON webhooks
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip_all, fields(entity = %notification.event.entity_id))]
    async fn send(&self, destination: &Alert, notification: &Notification) -> anyhow::Result<()> {
        let request = match destination {
            Alert::Discord(discord) => self.client.post(&discord.url).json(&notification.discord),
            Alert::Webhook(webhook) => {
                let event = &notification.event;
                let payload = json!({
                    "message": notification.text,
                    "entity": event.entity_id,
                    "owner": event.owner,
                    "kind": event.threshold.kind,
                    "idle_secs": event.idle.num_seconds(),
                    "last_activity": event.last_activity.to_rfc3339(),
                    "external_ref": event.external_ref,
                    "attributes": event.attributes,
                    "timestamp": Utc::now().to_rfc3339()
                });
                self.client.post(&webhook.url).json(&payload)
            }
        };

        let response = request.send().await.context("failed to send alert")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("alert destination responded with {status}: {body}");
        }

        trace!("alert delivered");
        Ok(())
    }
}

/// Outcome of dispatching one batch of alerts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,

    /// Events with no destination configured (logged only)
    pub undelivered: usize,
}

/// Routes alert events to their destinations
#[derive(Clone)]
pub struct AlertManager {
    notifier: Arc<dyn Notifier>,
    table: ThresholdTable,
    default_destination: Option<Alert>,
    overrides: HashMap<String, Alert>,
}

impl AlertManager {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        table: ThresholdTable,
        default_destination: Option<Alert>,
    ) -> Self {
        Self {
            notifier,
            table,
            default_destination,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let mut manager = Self::new(notifier, config.threshold_table()?, config.alert.clone());
        for threshold in &config.thresholds {
            if let Some(alert) = &threshold.alert {
                manager = manager.with_override(threshold.kind.clone(), alert.clone());
            }
        }
        Ok(manager)
    }

    /// Send alerts of `kind` to `destination` instead of the default
    pub fn with_override(mut self, kind: impl ToString, destination: Alert) -> Self {
        self.overrides.insert(kind.to_string(), destination);
        self
    }

    pub fn destination_for(&self, kind: &str) -> Option<&Alert> {
        self.overrides
            .get(kind)
            .or(self.default_destination.as_ref())
    }

    pub fn render(&self, event: &AlertEvent, destination: Option<&Alert>) -> Notification {
        let user_id = match destination {
            Some(Alert::Discord(discord)) => discord.user_id.as_deref(),
            _ => None,
        };

        Notification {
            event: event.clone(),
            text: format_message(event),
            discord: discord::build_idle_message(event, &self.table, user_id),
        }
    }

    /// Deliver every event once; failures are logged and counted
    #[instrument(skip_all, fields(count = events.len()))]
    pub async fn dispatch(&self, events: &[AlertEvent]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for event in events {
            let destination = self.destination_for(&event.threshold.kind);
            let notification = self.render(event, destination);

            let Some(destination) = destination else {
                info!("{}", notification.text);
                summary.undelivered += 1;
                continue;
            };

            match self.notifier.send(destination, &notification).await {
                Ok(()) => {
                    info!(
                        "sent '{}' alert for {}",
                        event.threshold.kind, event.entity_id
                    );
                    summary.delivered += 1;
                }
                Err(e) => {
                    error!(
                        "failed to send '{}' alert for {}: {:#}",
                        event.threshold.kind, event.entity_id, e
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

pub fn format_message(event: &AlertEvent) -> String {
    let mut message = format!(
        "⚠️ **Idle {}**: `{}` (owner `{}`) idle for **{}** (threshold {})",
        event.threshold.kind,
        event.entity_id,
        event.owner,
        format_duration(event.idle),
        format_duration(event.threshold.after),
    );
    if let Some(external_ref) = &event.external_ref {
        message.push_str(&format!("\nLink: {external_ref}"));
    }
    message
}
