use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Neutral marker for `UNKNOWN` and for events without a severity.
pub const DEFAULT_MARKER: &str = "🟦";

/// Embed color used for `UNKNOWN` and for events without a severity.
pub const DEFAULT_COLOR: u32 = 0xFFFFFF;

/// Ranked criticality of a finding.
///
/// Declaration order is the taxonomy order, so the derived `Ord` is the
/// only comparison used for thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Every level, lowest first.
    pub const ALL: [Severity; 5] = [
        Severity::Unknown,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Position in the taxonomy, `0` for `UNKNOWN`.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Unknown => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Levels at or above `threshold`, in taxonomy order.
    pub fn allowed(threshold: Severity) -> Vec<Severity> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.rank() >= threshold.rank())
            .collect()
    }

    /// Upper-case label as it appears in events and messages.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Lower-case label used as an endpoint-map key.
    pub fn as_key(self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    fn lookup(label: &str) -> Option<Severity> {
        let label = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.label().eq_ignore_ascii_case(label))
    }

    /// Strict parse for configuration values.
    pub fn parse_config(label: &str) -> Result<Severity, ConfigError> {
        Self::lookup(label).ok_or_else(|| ConfigError::BadThreshold {
            value: label.to_string(),
        })
    }

    /// Lenient parse for event data: anything unrecognized ranks as `UNKNOWN`.
    pub fn from_label(label: &str) -> Severity {
        Self::lookup(label).unwrap_or(Severity::Unknown)
    }

    /// Square emoji shown around the message badge.
    pub fn marker(self) -> &'static str {
        match self {
            Severity::Critical => "🟪",
            Severity::High => "🟥",
            Severity::Medium => "🟧",
            Severity::Low => "🟨",
            Severity::Unknown => DEFAULT_MARKER,
        }
    }

    /// RGB color for rich embeds.
    pub fn color(self) -> u32 {
        match self {
            Severity::Critical => 0xFF0000,
            Severity::High => 0xFFA500,
            Severity::Medium => 0xFFFF00,
            Severity::Low => 0x00FF00,
            Severity::Unknown => DEFAULT_COLOR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
