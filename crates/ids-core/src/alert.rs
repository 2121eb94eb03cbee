use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length for `title`.
pub const MAX_TITLE_LEN: usize = 256;
/// Maximum length for `description`; longer values are truncated by the
/// normalizer rather than rejected.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Ordered severity, numeric value preserved by construction.
///
/// Declaration order doubles as numeric order: `derive(Ord)` on a
/// fieldless enum ranks variants by declaration position, so severity
/// numeric ordering is a property the compiler enforces rather than a
/// convention every call site has to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn numeric(self) -> u8 {
        self as u8
    }

    pub fn as_wire_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parses the canonical upper-case name plus the producer-side
    /// spellings a real deployment tends to see: different vocabularies,
    /// different case, numeric severity tiers.
    pub fn parse_lenient(raw: &str) -> Option<Severity> {
        let normalized = raw.trim().to_ascii_lowercase();
        Some(match normalized.as_str() {
            "info" | "informational" | "notice" | "sev0" | "0" => Severity::Info,
            "low" | "sev1" | "1" => Severity::Low,
            "medium" | "warning" | "warn" | "sev2" | "2" => Severity::Medium,
            "high" | "sev3" | "3" => Severity::High,
            "critical" | "crit" | "fatal" | "sev4" | "4" => Severity::Critical,
            _ => return None,
        })
    }
}

impl Default for Severity {
    /// Missing severity coerces to LOW.
    fn default() -> Self {
        Severity::Low
    }
}

/// Producer/source kind, fixed set. Unknown values are a decode failure
/// (`MalformedAlert::UnknownSource`), never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    NidsSignature,
    NidsAnomaly,
    HidsFile,
    HidsProcess,
    HidsLog,
    Correlation,
}

impl AlertSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSource::NidsSignature => "nids_signature",
            AlertSource::NidsAnomaly => "nids_anomaly",
            AlertSource::HidsFile => "hids_file",
            AlertSource::HidsProcess => "hids_process",
            AlertSource::HidsLog => "hids_log",
            AlertSource::Correlation => "correlation",
        }
    }

    pub fn parse(raw: &str) -> Option<AlertSource> {
        Some(match raw {
            "nids_signature" => AlertSource::NidsSignature,
            "nids_anomaly" => AlertSource::NidsAnomaly,
            "hids_file" => AlertSource::HidsFile,
            "hids_process" => AlertSource::HidsProcess,
            "hids_log" => AlertSource::HidsLog,
            "correlation" => AlertSource::Correlation,
            _ => return None,
        })
    }

    /// Stable index into fixed-size per-source counters, matching
    /// declaration order.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The canonical, in-pipeline alert record.
///
/// This is the one record type that flows through normalization, dedup,
/// enrichment, correlation and sinks. Fields filled in later stages
/// (`risk_score`, `category`, `dedup_count`) start at their defaults;
/// `alert_id` is fixed at creation and never changes for the life of the
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: AlertSource,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default)]
    pub category: String,
    #[serde(default = "one")]
    pub dedup_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_refs: Option<Vec<String>>,
}

fn one() -> u32 {
    1
}

impl Alert {
    /// `correlation_refs`, when present, must have at least two entries.
    pub fn correlation_refs_valid(&self) -> bool {
        match &self.correlation_refs {
            None => true,
            Some(refs) => refs.len() >= 2,
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Lower-cased concatenation used for correlator regex matching:
    /// title, description, and the actor-bearing metadata values that
    /// rules are written to match against.
    pub fn text_blob(&self) -> String {
        let mut blob = format!("{} {}", self.title, self.description);
        for key in ["rule_id", "hostname", "src_ip", "dst_ip", "mitre_attack"] {
            if let Some(value) = self.metadata_str(key) {
                blob.push(' ');
                blob.push_str(value);
            }
        }
        blob.to_ascii_lowercase()
    }

    /// Extracted actor tuple used for correlator indexing.
    pub fn actors(&self) -> Actors {
        Actors {
            src_ip: self.metadata_str("src_ip").map(str::to_owned),
            dst_ip: self.metadata_str("dst_ip").map(str::to_owned),
            hostname: self.metadata_str("hostname").map(str::to_owned),
        }
    }
}

/// Non-empty actor identifiers extracted from an alert's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actors {
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub hostname: Option<String>,
}

impl Actors {
    /// Every non-empty actor value, used both for index keys and for the
    /// `same_actor` overlap check.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [self.src_ip.as_deref(), self.dst_ip.as_deref(), self.hostname.as_deref()]
            .into_iter()
            .flatten()
    }

    pub fn shares_actor_with(&self, other: &Actors) -> bool {
        self.values().any(|v| other.values().any(|o| o == v))
    }
}
