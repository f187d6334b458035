use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::delivery::DeliveryPolicy;
use crate::error::ConfigError;
use crate::route::{Bucket, EndpointMap};
use crate::severity::Severity;
use crate::types::{FINDING, VULNERABILITY};

/// Keys accepted by the combined `webhook_urls` map.
pub const COMBINED_BUCKETS: [&str; 6] = ["critical", "high", "medium", "low", "cloud", "cryptographic"];

/// Default cap on rendered message length, in characters.
pub const DEFAULT_MESSAGE_SIZE_LIMIT: usize = 2000;

/// Default JSON field carrying the rendered message.
pub const DEFAULT_CONTENT_KEY: &str = "content";

/// Watched kinds as written in config: a single tag or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTypes {
    One(String),
    Many(Vec<String>),
}

/// Raw notifier options as the host supplies them.
///
/// Exactly one of `webhooks` (severity-keyed) or `webhook_urls` (the fixed
/// severity + category map) must be set. Nothing here is trusted until
/// [`NotifierConfig::validate`] has produced a [`DispatchConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Severity label → URL.
    pub webhooks: Option<BTreeMap<String, String>>,

    /// `critical`, `high`, `medium`, `low`, `cloud`, `cryptographic` → URL.
    /// Empty strings leave a bucket unconfigured.
    pub webhook_urls: Option<BTreeMap<String, String>>,

    /// Kinds to consider at all; `*` watches everything.
    pub event_types: Option<EventTypes>,

    /// Lowest `VULNERABILITY` severity that gets delivered.
    pub min_severity: String,

    pub message_size_limit: usize,

    pub content_key: String,

    /// Attach a rich embed (title, description, color) to every message.
    pub embeds: bool,

    pub delivery: DeliveryPolicy,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhooks: None,
            webhook_urls: None,
            event_types: None,
            min_severity: Severity::Low.label().to_string(),
            message_size_limit: DEFAULT_MESSAGE_SIZE_LIMIT,
            content_key: DEFAULT_CONTENT_KEY.to_string(),
            embeds: false,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl NotifierConfig {
    /// Parse options from a YAML (or JSON) document.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Add a severity-keyed webhook.
    pub fn with_webhook(mut self, severity: impl Into<String>, url: impl Into<String>) -> Self {
        self.webhooks
            .get_or_insert_with(BTreeMap::new)
            .insert(severity.into(), url.into());
        self
    }

    /// Add an entry to the combined severity + category map.
    pub fn with_webhook_url(mut self, bucket: impl Into<String>, url: impl Into<String>) -> Self {
        self.webhook_urls
            .get_or_insert_with(BTreeMap::new)
            .insert(bucket.into(), url.into());
        self
    }

    pub fn with_min_severity(mut self, min_severity: impl Into<String>) -> Self {
        self.min_severity = min_severity.into();
        self
    }

    pub fn with_event_types<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(EventTypes::Many(kinds.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_message_size_limit(mut self, limit: usize) -> Self {
        self.message_size_limit = limit;
        self
    }

    pub fn with_embeds(mut self, embeds: bool) -> Self {
        self.embeds = embeds;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    /// Check every option and build the immutable runtime config.
    pub fn validate(self) -> Result<DispatchConfig, ConfigError> {
        let min_severity = Severity::parse_config(&self.min_severity)?;

        if self.message_size_limit < 4 {
            return Err(ConfigError::BadSizeLimit(self.message_size_limit));
        }
        self.delivery.check()?;

        let (endpoints, default_kinds): (EndpointMap, &[&str]) =
            match (self.webhooks, self.webhook_urls) {
                (Some(_), Some(_)) => return Err(ConfigError::AmbiguousEndpoints),
                (Some(map), None) => (severity_endpoints(map)?, &[VULNERABILITY][..]),
                (None, Some(map)) => (combined_endpoints(map)?, &[VULNERABILITY, FINDING][..]),
                (None, None) => return Err(ConfigError::NoEndpoints),
            };

        let watched = match self.event_types {
            Some(types) => WatchedKinds::from_config(types),
            None => WatchedKinds::from_config(EventTypes::Many(
                default_kinds.iter().map(|k| k.to_string()).collect(),
            )),
        };

        let content_key = match self.content_key.trim() {
            "" => DEFAULT_CONTENT_KEY.to_string(),
            key => key.to_string(),
        };

        Ok(DispatchConfig {
            endpoints,
            min_severity,
            allowed: Severity::allowed(min_severity),
            watched,
            message_size_limit: self.message_size_limit,
            content_key,
            embeds: self.embeds,
            delivery: self.delivery,
        })
    }
}

fn severity_endpoints(map: BTreeMap<String, String>) -> Result<EndpointMap, ConfigError> {
    if map.is_empty() {
        return Err(ConfigError::NoEndpoints);
    }

    let invalid: Vec<String> = map
        .keys()
        .filter(|k| Severity::parse_config(k).is_err())
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ConfigError::InvalidSeverities { keys: invalid });
    }

    let mut endpoints = EndpointMap::new();
    let mut seen = BTreeSet::new();
    for (key, raw_url) in map {
        let bucket = Bucket::Severity(Severity::parse_config(&key)?);
        claim(&mut seen, &bucket)?;
        if let Some(url) = parse_url(&bucket.to_string(), &raw_url)? {
            endpoints.insert(bucket, url);
        }
    }
    non_empty(endpoints)
}

fn combined_endpoints(map: BTreeMap<String, String>) -> Result<EndpointMap, ConfigError> {
    let invalid: Vec<String> = map
        .keys()
        .filter(|k| !COMBINED_BUCKETS.contains(&k.trim().to_lowercase().as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ConfigError::InvalidBuckets { keys: invalid });
    }

    let mut endpoints = EndpointMap::new();
    let mut seen = BTreeSet::new();
    for (key, raw_url) in map {
        let bucket = match Severity::parse_config(&key) {
            Ok(severity) => Bucket::Severity(severity),
            Err(_) => Bucket::category(key.trim()),
        };
        claim(&mut seen, &bucket)?;
        if let Some(url) = parse_url(&bucket.to_string(), &raw_url)? {
            endpoints.insert(bucket, url);
        }
    }
    non_empty(endpoints)
}

fn claim(seen: &mut BTreeSet<Bucket>, bucket: &Bucket) -> Result<(), ConfigError> {
    if seen.insert(bucket.clone()) {
        Ok(())
    } else {
        Err(ConfigError::DuplicateBucket {
            bucket: bucket.to_string(),
        })
    }
}

fn non_empty(endpoints: EndpointMap) -> Result<EndpointMap, ConfigError> {
    if endpoints.is_empty() {
        Err(ConfigError::NoEndpoints)
    } else {
        Ok(endpoints)
    }
}

/// `Ok(None)` for a blank entry, which leaves the bucket unconfigured.
fn parse_url(bucket: &str, raw: &str) -> Result<Option<Url>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        bucket: bucket.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(Some(url)),
        other => Err(ConfigError::InvalidUrl {
            bucket: bucket.to_string(),
            reason: format!("unsupported scheme {:?}", other),
        }),
    }
}

/// Set of event kinds the notifier considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedKinds {
    All,
    Only(BTreeSet<String>),
}

impl WatchedKinds {
    fn from_config(types: EventTypes) -> Self {
        let kinds = match types {
            EventTypes::One(kind) => vec![kind],
            EventTypes::Many(kinds) => kinds,
        };

        let mut set = BTreeSet::new();
        for kind in kinds {
            let kind = kind.trim().to_uppercase();
            if kind == "*" {
                return WatchedKinds::All;
            }
            if !kind.is_empty() {
                set.insert(kind);
            }
        }
        WatchedKinds::Only(set)
    }

    pub fn contains(&self, kind: &str) -> bool {
        match self {
            WatchedKinds::All => true,
            WatchedKinds::Only(set) => set.contains(&kind.trim().to_uppercase()),
        }
    }
}

/// Validated, immutable runtime configuration.
///
/// Built once by [`NotifierConfig::validate`] and shared read-only by every
/// in-flight delivery.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    endpoints: EndpointMap,
    min_severity: Severity,
    allowed: Vec<Severity>,
    watched: WatchedKinds,
    message_size_limit: usize,
    content_key: String,
    embeds: bool,
    delivery: DeliveryPolicy,
}

impl DispatchConfig {
    pub fn endpoints(&self) -> &EndpointMap {
        &self.endpoints
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Severities at or above the threshold, lowest first.
    pub fn allowed_severities(&self) -> &[Severity] {
        &self.allowed
    }

    pub fn admits(&self, severity: Severity) -> bool {
        self.allowed.contains(&severity)
    }

    pub fn watched(&self) -> &WatchedKinds {
        &self.watched
    }

    pub fn message_size_limit(&self) -> usize {
        self.message_size_limit
    }

    pub fn content_key(&self) -> &str {
        &self.content_key
    }

    pub fn embeds(&self) -> bool {
        self.embeds
    }

    pub fn delivery(&self) -> &DeliveryPolicy {
        &self.delivery
    }
}
