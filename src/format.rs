use serde_json::{json, Map, Value};

use crate::config::DispatchConfig;
use crate::severity::{Severity, DEFAULT_COLOR, DEFAULT_MARKER};
use crate::types::{Event, Payload, FINDING, VULNERABILITY};

const ELLIPSIS: &str = "...";

/// Renders events into chat messages and request envelopes.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    size_limit: usize,
    content_key: String,
    embeds: bool,
}

impl MessageFormatter {
    pub fn new(size_limit: usize, content_key: impl Into<String>) -> Self {
        Self {
            size_limit,
            content_key: content_key.into(),
            embeds: false,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.message_size_limit(), config.content_key()).with_embeds(config.embeds())
    }

    pub fn with_embeds(mut self, embeds: bool) -> Self {
        self.embeds = embeds;
        self
    }

    /// Render `event`, capped at the size limit.
    pub fn format(&self, event: &Event) -> String {
        let message = match &event.payload {
            Payload::Text(text) => format_text(event, text),
            Payload::Structured(map) => format_structured(event, map),
        };
        truncate(message, self.size_limit)
    }

    /// JSON request body for `event`.
    pub fn envelope(&self, event: &Event) -> Value {
        let mut body = Map::new();
        body.insert(self.content_key.clone(), Value::String(self.format(event)));

        if self.embeds {
            let title = event
                .title
                .clone()
                .unwrap_or_else(|| badge_label(event));
            let mut embed = json!({
                "title": truncate(title, 256),
                "color": color_for(event),
            });
            if let Some(description) = &event.description {
                embed["description"] = Value::String(truncate(description.clone(), 4096));
            }
            body.insert("embeds".to_string(), json!([embed]));
        }

        Value::Object(body)
    }
}

fn format_text(event: &Event, text: &str) -> String {
    format!("`[{}]`\t**`{}`**\ttags:{}", event.kind, text, event.tags.join(","))
}

fn format_structured(event: &Event, map: &Map<String, Value>) -> String {
    let block = serde_yaml::to_string(&key_ordered_map(map))
        .unwrap_or_else(|_| format!("{:?}\n", map));
    let badge = if is_decorated(event) {
        let marker = marker_for(event);
        format!("{} {} {}", marker, badge_label(event), marker)
    } else {
        format!("[{}]", event.kind)
    };
    format!("**`{}`**\n```yaml\n{}```", badge, block)
}

fn key_ordered_map(map: &Map<String, Value>) -> serde_yaml::Value {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    serde_yaml::Value::Mapping(
        entries
            .into_iter()
            .map(|(k, v)| (serde_yaml::Value::String(k.clone()), key_ordered(v)))
            .collect(),
    )
}

fn key_ordered(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Object(map) => key_ordered_map(map),
        Value::Array(items) => serde_yaml::Value::Sequence(items.iter().map(key_ordered).collect()),
        other => serde_yaml::to_value(other).unwrap_or(serde_yaml::Value::Null),
    }
}

fn is_decorated(event: &Event) -> bool {
    event.is_kind(VULNERABILITY) || event.is_kind(FINDING)
}

/// `KIND (SEVERITY)`, or just the kind when no severity is attached.
fn badge_label(event: &Event) -> String {
    match event.severity_label() {
        Some(label) => format!("{} ({})", event.kind, label.to_uppercase()),
        None if event.is_kind(VULNERABILITY) => {
            format!("{} ({})", event.kind, Severity::Unknown)
        }
        None => event.kind.clone(),
    }
}

fn event_severity(event: &Event) -> Option<Severity> {
    event.severity_label().map(Severity::from_label)
}

fn marker_for(event: &Event) -> &'static str {
    event_severity(event).map_or(DEFAULT_MARKER, Severity::marker)
}

fn color_for(event: &Event) -> u32 {
    event_severity(event).map_or(DEFAULT_COLOR, Severity::color)
}

/// Cap `message` at `limit` characters, marking the cut with an ellipsis.
pub fn truncate(message: String, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message;
    }
    if limit < ELLIPSIS.len() {
        return ELLIPSIS.chars().take(limit).collect();
    }
    let keep = limit - ELLIPSIS.len();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
