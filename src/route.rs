use std::collections::BTreeMap;
use std::fmt;

use url::Url;

use crate::severity::Severity;
use crate::types::Event;

/// Endpoint-map key: a severity level or a lower-cased category label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    Severity(Severity),
    Category(String),
}

impl Bucket {
    pub fn category(label: &str) -> Self {
        Bucket::Category(label.trim().to_lowercase())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Severity(s) => f.write_str(s.as_key()),
            Bucket::Category(c) => f.write_str(c),
        }
    }
}

/// Validated bucket → destination mapping.
pub type EndpointMap = BTreeMap<Bucket, Url>;

/// Bucket an event routes by.
///
/// Severity wins over category. An unrecognized severity label routes to
/// the `unknown` bucket rather than falling through to the category.
pub fn bucket_for(event: &Event) -> Option<Bucket> {
    if let Some(label) = event.severity_label() {
        return Some(Bucket::Severity(Severity::from_label(label)));
    }
    event.category_label().map(Bucket::category)
}

/// Destination for `event`, or `None` when its bucket has no endpoint.
pub fn resolve<'a>(event: &Event, endpoints: &'a EndpointMap) -> Option<&'a Url> {
    bucket_for(event).and_then(|bucket| endpoints.get(&bucket))
}
