use crate::config::DispatchConfig;
use crate::severity::Severity;
use crate::types::{Event, VULNERABILITY};

/// Whether an event is in scope, and why not when it isn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(String),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }

    /// Explanation for diagnostics; empty for accepted events.
    pub fn reason(&self) -> &str {
        match self {
            FilterDecision::Accept => "",
            FilterDecision::Reject(reason) => reason,
        }
    }
}

/// Kind and threshold checks. Pure, so rejected events cost no I/O.
///
/// Only `VULNERABILITY` events are compared against the threshold; other
/// watched kinds pass through.
pub fn check(event: &Event, config: &DispatchConfig) -> FilterDecision {
    if !config.watched().contains(&event.kind) {
        return FilterDecision::Reject(format!("{} is not a watched event type", event.kind));
    }

    if event.is_kind(VULNERABILITY) {
        let severity = Severity::from_label(event.severity_label().unwrap_or("UNKNOWN"));
        if !config.admits(severity) {
            return FilterDecision::Reject(format!(
                "{} is below min_severity threshold {}",
                severity,
                config.min_severity()
            ));
        }
    }

    FilterDecision::Accept
}
