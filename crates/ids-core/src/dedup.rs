use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::alert::Alert;

/// Canonical hash of `(source, title, src_ip, dst_ip, rule_id)`.
pub type Fingerprint = u64;

/// Computes the dedup fingerprint for a canonical alert.
///
/// Correlation alerts are fingerprinted differently by the deduplicator
/// itself, on `(rule_id, sorted(correlation_refs))` — this function
/// covers the content-based fingerprint used for every other source.
pub fn fingerprint(alert: &Alert) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    alert.source.as_str().hash(&mut hasher);
    alert.title.hash(&mut hasher);
    alert.metadata_str("src_ip").unwrap_or("").hash(&mut hasher);
    alert.metadata_str("dst_ip").unwrap_or("").hash(&mut hasher);
    alert.metadata_str("rule_id").unwrap_or("").hash(&mut hasher);
    hasher.finish()
}

/// One entry in the deduplicator's fingerprint cache.
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub fingerprint: Fingerprint,
    pub original_alert_id: String,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub count: u32,
}

impl DedupEntry {
    pub fn new(fingerprint: Fingerprint, original_alert_id: String, now: Instant) -> Self {
        DedupEntry { fingerprint, original_alert_id, first_seen: now, last_seen: now, count: 1 }
    }

    pub fn is_expired(&self, now: Instant, window: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertSource, Severity};
    use std::collections::HashMap;

    fn sample(title: &str, src_ip: &str) -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("src_ip".to_string(), serde_json::json!(src_ip));
        Alert {
            alert_id: "a1".into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::Medium,
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
    fn identical_alerts_share_a_fingerprint() {
        let a = sample("Port Scan", "10.0.0.5");
        let b = sample("Port Scan", "10.0.0.5");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_source_ip_changes_fingerprint() {
        let a = sample("Port Scan", "10.0.0.5");
        let b = sample("Port Scan", "10.0.0.6");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
