use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind tag of vulnerability events, the only kind subject to the threshold.
pub const VULNERABILITY: &str = "VULNERABILITY";

/// Kind tag of generic findings.
pub const FINDING: &str = "FINDING";

/// Event body as produced upstream.
///
/// The two shapes are rendered differently by the formatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Map<String, Value>),
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Structured(map)
    }
}

/// A security finding handed to the notifier.
///
/// The notifier only ever reads events; the producer owns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Category tag, e.g. `VULNERABILITY` or `FINDING`.
    pub kind: String,

    /// Raw severity label; absent for most non-vulnerability kinds.
    #[serde(default)]
    pub severity: Option<String>,

    /// Secondary routing bucket, used when `severity` is absent.
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub payload: Payload,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl Event {
    /// Create an event with the given kind and payload and no metadata.
    pub fn new(kind: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            kind: kind.into(),
            severity: None,
            category: None,
            title: None,
            description: None,
            payload: payload.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a tag, keeping insertion order and skipping duplicates.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Non-blank severity label, trimmed.
    pub fn severity_label(&self) -> Option<&str> {
        non_blank(self.severity.as_deref())
    }

    /// Non-blank category label, trimmed.
    pub fn category_label(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.trim().eq_ignore_ascii_case(kind)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
