use std::collections::HashMap;
use std::time::{Duration, Instant};

use ids_core::dedup::{fingerprint, DedupEntry, Fingerprint};
use ids_core::Alert;

/// Outcome of running an alert through the deduplicator.
pub enum DedupOutcome {
    /// First time this fingerprint has been seen within the window; the
    /// alert passes through unchanged.
    Pass,
    /// A duplicate of `original_alert_id`, now seen `count` times.
    Suppressed { original_alert_id: String, count: u32 },
}

/// Time-bounded fingerprint cache. Best-effort: never a security-relevant
/// filter, only a volume optimization.
pub struct Deduplicator {
    window: Duration,
    max_entries: usize,
    entries: HashMap<Fingerprint, DedupEntry>,
}

impl Deduplicator {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        Deduplicator { window: Duration::from_millis(window_ms), max_entries, entries: HashMap::new() }
    }

    /// Correlation alerts fingerprint on `(rule_id, sorted(correlation_refs))`
    /// rather than content, so a rule's synthetic alert dedups by the set of
    /// contributing alerts, not by title/actor overlap.
    pub fn correlation_fingerprint(rule_id: &str, correlation_refs: &[String]) -> Fingerprint {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut sorted = correlation_refs.to_vec();
        sorted.sort();
        let mut hasher = DefaultHasher::new();
        rule_id.hash(&mut hasher);
        sorted.hash(&mut hasher);
        hasher.finish()
    }

    /// The fingerprint an alert dedups under: content hash for ordinary
    /// alerts, `(rule_id, sorted(correlation_refs))` for correlation
    /// alerts. Exposed so callers outside `check` (tracking the pending
    /// dispatched copy for a fingerprint) compute the identical key.
    pub fn key_for(alert: &Alert) -> Fingerprint {
        match (&alert.source, &alert.correlation_refs) {
            (ids_core::AlertSource::Correlation, Some(refs)) => {
                let rule_id = alert.metadata_str("rule_id").unwrap_or("");
                Self::correlation_fingerprint(rule_id, refs)
            }
            _ => fingerprint(alert),
        }
    }

    /// Looks up (or inserts) the fingerprint for `alert` at `now`.
    pub fn check(&mut self, alert: &Alert, now: Instant) -> DedupOutcome {
        let key = Self::key_for(alert);

        if let Some(entry) = self.entries.get_mut(&key) {
            if now.saturating_duration_since(entry.last_seen) <= self.window {
                entry.last_seen = now;
                entry.count += 1;
                return DedupOutcome::Suppressed {
                    original_alert_id: entry.original_alert_id.clone(),
                    count: entry.count,
                };
            }
        }

        self.evict_if_full(now);
        self.entries.insert(key, DedupEntry::new(key, alert.alert_id.clone(), now));
        DedupOutcome::Pass
    }

    /// Drops every entry older than `window`, returning what was evicted
    /// so the caller can act on it (e.g. report a suppressed fingerprint's
    /// final count before forgetting it). Intended to run on a periodic
    /// tick in addition to the bounded eviction done on insert.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<(Fingerprint, DedupEntry)> {
        let window = self.window;
        let expired: Vec<Fingerprint> =
            self.entries.iter().filter(|(_, entry)| entry.is_expired(now, window)).map(|(key, _)| *key).collect();
        expired.into_iter().filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry))).collect()
    }

    fn evict_if_full(&mut self, now: Instant) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if let Some((&oldest_key, _)) = self.entries.iter().min_by_key(|(_, e)| e.last_seen) {
            self.entries.remove(&oldest_key);
        }
        let _ = now;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::AlertSource;
    use std::collections::HashMap;

    fn sample(title: &str, src_ip: &str) -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("src_ip".to_string(), serde_json::json!(src_ip));
        Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: ids_core::Severity::Medium,
            title: title.into(),
            description: String::new(),
            metadata,
            risk_score: 0,
            category: String::new(),
            dedup_count: 1,
            correlation_refs: None,
        }
    }

    #[test]
    fn second_identical_alert_within_window_is_suppressed() {
        let mut dedup = Deduplicator::new(60_000, 1_000);
        let now = Instant::now();
        let a = sample("Port Scan", "10.0.0.5");
        let b = sample("Port Scan", "10.0.0.5");

        assert!(matches!(dedup.check(&a, now), DedupOutcome::Pass));
        match dedup.check(&b, now) {
            DedupOutcome::Suppressed { original_alert_id, count } => {
                assert_eq!(original_alert_id, a.alert_id);
                assert_eq!(count, 2);
            }
            DedupOutcome::Pass => panic!("expected suppression"),
        }
    }

    #[test]
    fn eviction_drops_oldest_entry_when_full() {
        let mut dedup = Deduplicator::new(60_000, 2);
        let t0 = Instant::now();
        dedup.check(&sample("a", "1.1.1.1"), t0);
        dedup.check(&sample("b", "2.2.2.2"), t0 + Duration::from_millis(1));
        assert_eq!(dedup.len(), 2);
        // third distinct fingerprint forces eviction of the oldest (a)
        dedup.check(&sample("c", "3.3.3.3"), t0 + Duration::from_millis(2));
        assert_eq!(dedup.len(), 2);
        match dedup.check(&sample("a", "1.1.1.1"), t0 + Duration::from_millis(3)) {
            DedupOutcome::Pass => {}
            DedupOutcome::Suppressed { .. } => panic!("oldest entry should have been evicted"),
        }
    }

    #[test]
    fn evict_expired_returns_entries_it_removes() {
        let mut dedup = Deduplicator::new(1_000, 1_000);
        let t0 = Instant::now();
        let a = sample("Port Scan", "10.0.0.5");
        dedup.check(&a, t0);
        dedup.check(&sample("Port Scan", "10.0.0.5"), t0 + Duration::from_millis(10));

        let evicted = dedup.evict_expired(t0 + Duration::from_millis(2_000));
        assert_eq!(evicted.len(), 1);
        let (key, entry) = &evicted[0];
        assert_eq!(*key, Deduplicator::key_for(&a));
        assert_eq!(entry.count, 2);
        assert!(dedup.is_empty());
    }
}
