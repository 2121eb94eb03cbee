use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ids_core::correlation::{CorrelationEvent, CorrelationRule};
use ids_core::{Alert, AlertSource, Severity};
use regex::Regex;
use tracing::warn;

/// A rule with its matcher patterns pre-compiled. A rule whose regex
/// fails to compile at startup is kept around (for `status` visibility)
/// but never evaluated.
struct CompiledRule {
    rule: CorrelationRule,
    matchers: Vec<Regex>,
    enabled: bool,
}

/// Single-writer event index and rule evaluator.
///
/// Every method takes `&mut self` and is meant to be driven from one
/// dedicated task — the correlator owns its indices outright and never
/// shares them behind a lock. `source = correlation` alerts are never
/// ingested here, which is what breaks the alert → correlator → alert
/// feedback cycle.
pub struct EventCorrelator {
    events_all: VecDeque<String>,
    events_by_actor: HashMap<String, VecDeque<String>>,
    events_by_source: HashMap<AlertSource, VecDeque<String>>,
    store: HashMap<String, CorrelationEvent>,
    rules: Vec<CompiledRule>,
    max_history_window: Duration,
    fired: HashMap<(String, Vec<String>), Instant>,
    pub rule_errors: u64,
}

fn compile_rules(rules: Vec<CorrelationRule>) -> Vec<CompiledRule> {
    rules
        .into_iter()
        .map(|rule| {
            let mut matchers = Vec::with_capacity(rule.required_events.len());
            let mut enabled = true;
            for matcher in &rule.required_events {
                match matcher.compile() {
                    Ok(regex) => matchers.push(regex),
                    Err(err) => {
                        warn!(rule_id = %rule.rule_id, error = %err, "rule disabled: matcher regex failed to compile");
                        enabled = false;
                        break;
                    }
                }
            }
            CompiledRule { rule, matchers, enabled }
        })
        .collect()
}

impl EventCorrelator {
    pub fn new(rules: Vec<CorrelationRule>, max_history_window_ms: u64) -> Self {
        EventCorrelator {
            events_all: VecDeque::new(),
            events_by_actor: HashMap::new(),
            events_by_source: HashMap::new(),
            store: HashMap::new(),
            rules: compile_rules(rules),
            max_history_window: Duration::from_millis(max_history_window_ms),
            fired: HashMap::new(),
            rule_errors: 0,
        }
    }

    /// Swaps in a new rule set without disturbing accumulated event
    /// history or the cooldown table, so a config reload doesn't reopen
    /// rules that just cooled down.
    pub fn replace_rules(&mut self, rules: Vec<CorrelationRule>) {
        self.rules = compile_rules(rules);
    }

    /// Ingests one alert (already filtered to `source != correlation` by
    /// the caller) and returns every synthetic correlation alert that
    /// fires as a result.
    pub fn ingest(&mut self, alert: &Alert, now: Instant) -> Vec<Alert> {
        debug_assert_ne!(alert.source, AlertSource::Correlation, "correlation alerts must not re-enter the correlator");

        let event = CorrelationEvent::from_alert(alert, now);
        self.insert_event(event);
        self.evict_expired(now);

        let triggering_id = alert.alert_id.clone();
        let mut fired_alerts = Vec::new();
        for index in 0..self.rules.len() {
            if !self.rules[index].enabled {
                continue;
            }
            if let Some(fired) = self.evaluate_rule(index, &triggering_id, now) {
                fired_alerts.push(fired);
            }
        }
        fired_alerts
    }

    fn insert_event(&mut self, event: CorrelationEvent) {
        let id = event.event_id.clone();
        for actor in event.actors.values() {
            self.events_by_actor.entry(actor.to_string()).or_default().push_back(id.clone());
        }
        self.events_by_source.entry(event.source).or_default().push_back(id.clone());
        self.events_all.push_back(id.clone());
        self.store.insert(id, event);
    }

    /// Evicts everything whose age exceeds `max_history_window`, from
    /// `events_all`, every actor index, and the source index.
    fn evict_expired(&mut self, now: Instant) {
        while let Some(id) = self.events_all.front() {
            let age = self.store.get(id).map(|e| e.age(now)).unwrap_or(Duration::MAX);
            if age <= self.max_history_window {
                break;
            }
            let id = self.events_all.pop_front().unwrap();
            if let Some(event) = self.store.remove(&id) {
                for actor in event.actors.values() {
                    if let Some(deque) = self.events_by_actor.get_mut(actor) {
                        deque.retain(|e| e != &id);
                    }
                }
                if let Some(deque) = self.events_by_source.get_mut(&event.source) {
                    deque.retain(|e| e != &id);
                }
            }
        }
    }

    /// Clones every event within `window` of `now`, most recent first.
    /// Cloning keeps this free of self's lifetime so the caller can mix
    /// it with later mutable borrows of other fields (`fired`).
    fn candidate_pool(events_all: &VecDeque<String>, store: &HashMap<String, CorrelationEvent>, window: Duration, now: Instant) -> Vec<CorrelationEvent> {
        events_all
            .iter()
            .rev()
            .filter_map(|id| store.get(id))
            .filter(|event| event.age(now) <= window)
            .cloned()
            .collect()
    }

    fn evaluate_rule(&mut self, index: usize, triggering_id: &str, now: Instant) -> Option<Alert> {
        let rule = self.rules[index].rule.clone();
        let window = Duration::from_millis(rule.time_window_ms);
        let candidates = Self::candidate_pool(&self.events_all, &self.store, window, now);
        let triggering_event = self.store.get(triggering_id)?.clone();

        let mut chosen: Vec<CorrelationEvent> = Vec::with_capacity(self.rules[index].matchers.len());
        for (matcher, regex) in rule.required_events.iter().zip(self.rules[index].matchers.iter()) {
            let mut pick: Option<&CorrelationEvent> = None;
            for event in &candidates {
                if !matcher.source_matches(event.source) || !regex.is_match(&event.text_blob) {
                    continue;
                }
                if rule.same_actor && !event.actors.shares_actor_with(&triggering_event.actors) {
                    continue;
                }
                if event.event_id == triggering_id {
                    pick = Some(event);
                    break;
                }
                if pick.is_none() {
                    pick = Some(event);
                }
            }
            match pick {
                Some(event) => chosen.push(event.clone()),
                None => return None,
            }
        }

        let mut distinct_ids: Vec<String> = chosen.iter().map(|e| e.event_id.clone()).collect();
        distinct_ids.sort();
        distinct_ids.dedup();

        if distinct_ids.len() < rule.effective_min_distinct() {
            return None;
        }
        if !distinct_ids.iter().any(|id| id == triggering_id) {
            return None;
        }

        let cooldown = Duration::from_millis(rule.effective_cooldown_ms());
        let signature = (rule.rule_id.clone(), distinct_ids.clone());
        if let Some(last_fired) = self.fired.get(&signature) {
            if now.saturating_duration_since(*last_fired) < cooldown {
                return None;
            }
        }
        self.fired.insert(signature, now);

        Some(synthesize_correlation_alert(&rule, &chosen, triggering_id))
    }
}

/// Builds the synthetic `source = correlation` alert for a rule firing.
/// `correlation_refs` lists the contributing alert IDs, most recent first.
fn synthesize_correlation_alert(rule: &CorrelationRule, chosen: &[&CorrelationEvent], triggering_id: &str) -> Alert {
    let mut refs: Vec<&CorrelationEvent> = chosen.to_vec();
    refs.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    let mut correlation_refs: Vec<String> = refs.iter().map(|e| e.event_id.clone()).collect();
    correlation_refs.dedup();

    let mut metadata = std::collections::HashMap::new();
    metadata.insert("rule_id".to_string(), serde_json::json!(rule.rule_id));
    metadata.insert("time_window_ms".to_string(), serde_json::json!(rule.time_window_ms));
    metadata.insert("triggering_alert_id".to_string(), serde_json::json!(triggering_id));

    let mut shared_actors: Vec<&str> = chosen.iter().flat_map(|e| e.actors.values()).collect();
    shared_actors.sort();
    shared_actors.dedup();
    if !shared_actors.is_empty() {
        metadata.insert("shared_actors".to_string(), serde_json::json!(shared_actors));
    }

    Alert {
        alert_id: format!("correlation_{}_{}", rule.rule_id, chrono::Utc::now().timestamp_micros()),
        timestamp: chrono::Utc::now(),
        source: AlertSource::Correlation,
        severity: rule.severity,
        title: rule.name.clone(),
        description: rule.description.clone(),
        metadata,
        risk_score: 0,
        category: String::new(),
        dedup_count: 1,
        correlation_refs: Some(correlation_refs),
    }
}

impl std::fmt::Debug for EventCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCorrelator")
            .field("tracked_events", &self.events_all.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::correlation::EventMatcher;
    use std::collections::HashMap;

    fn scan_alert(id: &str, src_ip: &str) -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("src_ip".to_string(), serde_json::json!(src_ip));
        Alert {
            alert_id: id.into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::Medium,
            title: "Port Scan".into(),
            description: String::new(),
            metadata,
            risk_score: 0,
            category: String::new(),
            dedup_count: 1,
            correlation_refs: None,
        }
    }

    fn exploit_alert(id: &str, src_ip: &str) -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("src_ip".to_string(), serde_json::json!(src_ip));
        Alert {
            alert_id: id.into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::High,
            title: "SQL Injection".into(),
            description: String::new(),
            metadata,
            risk_score: 0,
            category: String::new(),
            dedup_count: 1,
            correlation_refs: None,
        }
    }

    fn scan_then_exploit_rule() -> CorrelationRule {
        CorrelationRule {
            rule_id: "scan_then_exploit".into(),
            name: "Port scan followed by exploitation".into(),
            description: String::new(),
            severity: Severity::Critical,
            time_window_ms: 600_000,
            required_events: vec![
                EventMatcher { source: Some(AlertSource::NidsSignature), pattern: "port scan".into() },
                EventMatcher { source: Some(AlertSource::NidsSignature), pattern: "sql injection".into() },
            ],
            same_actor: true,
            min_distinct_events: None,
            cooldown_ms: None,
        }
    }

    #[test]
    fn fires_when_scan_and_exploit_share_an_ip() {
        let mut correlator = EventCorrelator::new(vec![scan_then_exploit_rule()], 900_000);
        let t0 = Instant::now();
        assert!(correlator.ingest(&scan_alert("a1", "10.0.0.5"), t0).is_empty());
        let fired = correlator.ingest(&exploit_alert("a2", "10.0.0.5"), t0 + Duration::from_secs(300));
        assert_eq!(fired.len(), 1);
        let alert = &fired[0];
        assert_eq!(alert.source, AlertSource::Correlation);
        assert_eq!(alert.severity, Severity::Critical);
        let refs = alert.correlation_refs.as_ref().unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&"a1".to_string()));
        assert!(refs.contains(&"a2".to_string()));
    }

    #[test]
    fn does_not_fire_across_different_ips() {
        let mut correlator = EventCorrelator::new(vec![scan_then_exploit_rule()], 900_000);
        let t0 = Instant::now();
        assert!(correlator.ingest(&scan_alert("a1", "10.0.0.5"), t0).is_empty());
        let fired = correlator.ingest(&exploit_alert("a2", "10.0.0.9"), t0 + Duration::from_secs(300));
        assert!(fired.is_empty());
    }

    #[test]
    fn events_are_evicted_once_past_max_history_window() {
        let mut correlator = EventCorrelator::new(vec![scan_then_exploit_rule()], 1_000);
        let t0 = Instant::now();
        correlator.ingest(&scan_alert("a1", "10.0.0.5"), t0);
        assert_eq!(correlator.events_all.len(), 1);
        correlator.ingest(&scan_alert("a2", "10.0.0.6"), t0 + Duration::from_millis(1_001));
        assert_eq!(correlator.events_all.len(), 1);
        assert_eq!(correlator.events_all[0], "a2");
    }
}
