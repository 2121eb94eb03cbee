use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::alert::{Actors, Alert, AlertSource, Severity};

/// Internal projection of an alert kept in the correlator's sliding
/// window. `received_at` is a monotonic `Instant`, never the producer's
/// clock — window eviction is governed by receive time so memory is
/// bounded regardless of producer clock skew.
#[derive(Debug, Clone)]
pub struct CorrelationEvent {
    pub event_id: String,
    pub received_at: Instant,
    pub source: AlertSource,
    pub severity: Severity,
    pub title: String,
    pub actors: Actors,
    pub text_blob: String,
}

impl CorrelationEvent {
    pub fn from_alert(alert: &Alert, received_at: Instant) -> Self {
        CorrelationEvent {
            event_id: alert.alert_id.clone(),
            received_at,
            source: alert.source,
            severity: alert.severity,
            title: alert.title.clone(),
            actors: alert.actors(),
            text_blob: alert.text_blob(),
        }
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.received_at)
    }
}

/// A single required match within a [`CorrelationRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMatcher {
    /// `None` means "any source" (wildcard).
    #[serde(default)]
    pub source: Option<AlertSource>,
    /// Case-insensitive regex evaluated against `text_blob`.
    pub pattern: String,
}

impl EventMatcher {
    pub fn source_matches(&self, source: AlertSource) -> bool {
        match self.source {
            None => true,
            Some(expected) => expected == source,
        }
    }

    /// Compiles `pattern` as a case-insensitive regex. Startup-time
    /// failures disable just the owning rule; they never abort the
    /// correlator.
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        regex::RegexBuilder::new(&self.pattern).case_insensitive(true).build()
    }
}

/// A correlation rule. `time_window_ms` bounds the candidate pool;
/// `min_distinct_events` defaults to `required_events.len()` when absent
/// from configuration (see [`CorrelationRule::effective_min_distinct`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub time_window_ms: u64,
    pub required_events: Vec<EventMatcher>,
    #[serde(default)]
    pub same_actor: bool,
    #[serde(default)]
    pub min_distinct_events: Option<usize>,
    /// Re-firing cooldown; defaults to `time_window_ms` when absent.
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
}

impl CorrelationRule {
    pub fn effective_min_distinct(&self) -> usize {
        self.min_distinct_events.unwrap_or(self.required_events.len())
    }

    pub fn effective_cooldown_ms(&self) -> u64 {
        self.cooldown_ms.unwrap_or(self.time_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_distinct_defaults_to_matcher_count() {
        let rule = CorrelationRule {
            rule_id: "r1".into(),
            name: "n".into(),
            description: String::new(),
            severity: Severity::High,
            time_window_ms: 1000,
            required_events: vec![
                EventMatcher { source: None, pattern: "a".into() },
                EventMatcher { source: None, pattern: "b".into() },
            ],
            same_actor: false,
            min_distinct_events: None,
            cooldown_ms: None,
        };
        assert_eq!(rule.effective_min_distinct(), 2);
        assert_eq!(rule.effective_cooldown_ms(), 1000);
    }
}
