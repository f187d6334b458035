use std::fmt;

use thiserror::Error;

use crate::route::Bucket;

/// Errors detected while validating notifier configuration.
///
/// Any of these disables the notifier; the host keeps running without it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Threshold label is not part of the severity taxonomy.
    #[error("bad threshold: min_severity must be one of UNKNOWN,LOW,MEDIUM,HIGH,CRITICAL (got {value:?})")]
    BadThreshold { value: String },

    /// No endpoint URL configured.
    #[error("no webhooks configured")]
    NoEndpoints,

    /// Both endpoint map shapes were supplied at once.
    #[error("configure either `webhooks` or `webhook_urls`, not both")]
    AmbiguousEndpoints,

    /// Severity-keyed map contains keys outside the taxonomy.
    #[error("invalid severities in webhooks: {keys:?}")]
    InvalidSeverities { keys: Vec<String> },

    /// Combined map contains keys outside the fixed bucket set.
    #[error("invalid buckets in webhook_urls: {keys:?}")]
    InvalidBuckets { keys: Vec<String> },

    /// Two keys name the same bucket once case and whitespace are ignored.
    #[error("webhook bucket {bucket} is configured more than once")]
    DuplicateBucket { bucket: String },

    /// Endpoint URL does not parse.
    #[error("invalid webhook url for {bucket}: {reason}")]
    InvalidUrl { bucket: String, reason: String },

    /// Size limit too small to hold the truncation marker.
    #[error("message_size_limit must be at least 4 (got {0})")]
    BadSizeLimit(usize),

    /// Delivery policy cannot make a single attempt.
    #[error("invalid delivery policy: {0}")]
    BadDeliveryPolicy(&'static str),

    /// Raw configuration could not be parsed.
    #[error("could not parse notifier config: {0}")]
    Parse(String),
}

/// Errors surfaced by a [`Transport`](crate::Transport) before any HTTP status is known.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// Reasons why a single delivery attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network,
    RateLimited,
    RemoteStatus(u16),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network =>
                write!(f, "network error"),
            FailureReason::RateLimited =>
                write!(f, "rate limited by remote endpoint"),
            FailureReason::RemoteStatus(status) =>
                write!(f, "remote endpoint returned status {}", status),
        }
    }
}

impl From<&TransportError> for FailureReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout => FailureReason::Timeout,
            TransportError::Network(_) => FailureReason::Network,
        }
    }
}

/// Final outcome of one delivery loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote endpoint accepted the message.
    Delivered { attempts: u32 },

    /// Retry budget exhausted.
    GaveUp { attempts: u32, last_failure: FailureReason },

    /// Cancelled at a suspension point before success.
    Cancelled { attempts: u32 },
}

/// What happened to one event handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32 },

    /// Kind not watched or severity below threshold.
    Filtered(String),

    /// No destination for the event's bucket; `None` when the event has
    /// neither severity nor category.
    Unrouted(Option<Bucket>),

    GaveUp { attempts: u32, reason: FailureReason },

    Cancelled,

    /// Dispatcher has been shut down.
    Shutdown,
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

impl From<DeliveryOutcome> for DispatchOutcome {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Delivered { attempts } =>
                DispatchOutcome::Delivered { attempts },
            DeliveryOutcome::GaveUp { attempts, last_failure } =>
                DispatchOutcome::GaveUp { attempts, reason: last_failure },
            DeliveryOutcome::Cancelled { .. } =>
                DispatchOutcome::Cancelled,
        }
    }
}
