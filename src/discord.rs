use serde::Serialize;

use crate::alerts::tracker::AlertEvent;
use crate::monitors::idle::ThresholdTable;
use crate::util::format_duration;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const YELLOW: u32 = 16776960;

/// Build the Discord message announcing a crossed idle threshold
pub fn build_idle_message(
    event: &AlertEvent,
    table: &ThresholdTable,
    user_id: Option<&str>,
) -> Message {
    let mut builder = MessageBuilder::new().add_embed(build_idle_embed(event, table));
    if let Some(user_id) = user_id {
        builder = builder.content(format!(
            "🏠 `{}` ~ {} idle ({}) <@{user_id}>",
            event.entity_id,
            format_duration(event.idle),
            event.threshold.kind
        ));
    }
    builder.build()
}

pub fn build_idle_embed(event: &AlertEvent, table: &ThresholdTable) -> Embed {
    let last = table.last();
    let color = if event.threshold.kind == last.kind {
        RED
    } else if event.threshold.kind == table.first().kind {
        YELLOW
    } else {
        ORANGE
    };

    let mut fields = vec![
        EmbedField {
            name: "👤 Owner".to_string(),
            value: event.owner.clone(),
            inline: true,
        },
        EmbedField {
            name: "⏳ Idle".to_string(),
            value: format_duration(event.idle),
            inline: true,
        },
        EmbedField {
            name: "🕑 Last activity".to_string(),
            value: event.last_activity.format("%Y-%m-%d %H:%M UTC").to_string(),
            inline: true,
        },
    ];

    fields.extend(event.attributes.iter().map(|(key, value)| EmbedField {
        name: key.clone(),
        value: value.clone(),
        inline: true,
    }));

    fields.push(EmbedField {
        name: format!("📊 Towards '{}'", last.kind),
        value: create_progress_bar(
            event.idle.num_seconds() as f64,
            last.after.num_seconds() as f64,
        ),
        inline: false,
    });

    Embed {
        title: Some(format!("⚠️ Idle {}: {}", event.threshold.kind, event.entity_id)),
        description: Some(format!(
            "**{}** has been idle for **{}** and crossed the `{}` threshold ({}).",
            event.entity_id,
            format_duration(event.idle),
            event.threshold.kind,
            format_duration(event.threshold.after),
        )),
        url: event
            .external_ref
            .as_ref()
            .filter(|r| r.starts_with("http"))
            .cloned(),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: format!("Entity: {}", event.entity_id),
        }),
        timestamp: Some(event.observed_at.to_rfc3339()),
    }
}

fn create_progress_bar(current: f64, limit: f64) -> String {
    let ratio = if limit > 0.0 { current / limit } else { 1.0 };
    let percentage = ratio * 100.0;
    let filled = ((ratio * 10.0) as usize).min(10);
    let empty = 10 - filled;

    let bar = "█".repeat(filled) + &"░".repeat(empty);
    let status_emoji = if percentage >= 100.0 {
        "🔴"
    } else if percentage >= 80.0 {
        "🟠"
    } else if percentage >= 60.0 {
        "🟡"
    } else {
        "🟢"
    };

    format!("{} `{}` {:.1}%", status_emoji, bar, percentage)
}
