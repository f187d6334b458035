//! A severity-routed chat-webhook notifier for security findings.
//!
//! Events from an upstream scanner are filtered by kind and severity,
//! routed to a webhook chosen by severity (or category when there is no
//! severity), rendered into a chat message and POSTed with retry and
//! server-directed backoff.
//!
//! ## Guarantees
//! - Configuration is validated once, before any event is handled
//! - Rejected events cost no I/O
//! - Messages never exceed the configured size limit
//! - Bounded retries per event, cancellable at every suspension point
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Exactly-once delivery
//! - Ordering between events
//! - Shared rate limiting across events targeting the same webhook
//!
//! This crate is a single-hop, best-effort notifier, not a message bus.

mod config;
mod delivery;
mod dispatcher;
mod error;
mod filter;
mod format;
mod route;
mod severity;
mod types;

pub use config::{
    DispatchConfig,
    EventTypes,
    NotifierConfig,
    WatchedKinds,
    COMBINED_BUCKETS,
    DEFAULT_CONTENT_KEY,
    DEFAULT_MESSAGE_SIZE_LIMIT,
};
pub use delivery::{Deliverer, DeliveryPolicy, Transport, TransportResponse};
pub use dispatcher::Dispatcher;
pub use error::{
    ConfigError,
    DeliveryOutcome,
    DispatchOutcome,
    FailureReason,
    TransportError,
};
pub use filter::{check as check_event, FilterDecision};
pub use format::{truncate, MessageFormatter};
pub use route::{bucket_for, resolve, Bucket, EndpointMap};
pub use severity::{Severity, DEFAULT_COLOR, DEFAULT_MARKER};
pub use types::{Event, Payload, FINDING, VULNERABILITY};

#[cfg(feature = "http")]
pub use delivery::HttpTransport;

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}
