use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use ids_core::alert::{MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};
use ids_core::codec::{decode_envelope, MalformedAlert, RawEnvelope};
use ids_core::{Alert, AlertSource, Severity};

/// Per-source monotonic sequence used to synthesize `alert_id` when a
/// producer doesn't supply one. One instance is owned per receiver task,
/// matching the per-source ordering guarantee.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Decodes and normalizes a raw producer payload into a canonical alert.
///
/// A pure function of its inputs: running it twice on the same bytes with
/// the same sequence counter state produces the same alert modulo the
/// synthesized ID's sequence number.
pub fn normalize(bytes: &[u8], sequence: &SequenceCounter) -> Result<Alert, MalformedAlert> {
    let envelope = decode_envelope(bytes)?;
    normalize_envelope(envelope, sequence)
}

fn normalize_envelope(envelope: RawEnvelope, sequence: &SequenceCounter) -> Result<Alert, MalformedAlert> {
    let source = AlertSource::parse(&envelope.source).ok_or(MalformedAlert::UnknownSource(envelope.source))?;
    let received_at = Utc::now();

    let alert_id = envelope.alert_id.unwrap_or_else(|| {
        format!("{}_{}_{}", source.as_str(), sequence.next(), received_at.timestamp_micros())
    });

    let timestamp = envelope.timestamp.unwrap_or(received_at);

    let severity = envelope
        .severity
        .as_deref()
        .and_then(Severity::parse_lenient)
        .unwrap_or_else(|| classify_severity(source, &envelope.title));

    let mut title = envelope.title;
    title.truncate(MAX_TITLE_LEN);

    let mut description = envelope.description.unwrap_or_default();
    description.truncate(MAX_DESCRIPTION_LEN);

    let mut metadata = envelope.metadata;
    if envelope.timestamp.is_none() {
        metadata.entry("producer_timestamp".to_string()).or_insert_with(|| serde_json::Value::Null);
    } else {
        metadata.insert(
            "producer_timestamp".to_string(),
            serde_json::Value::String(envelope.timestamp.unwrap().to_rfc3339()),
        );
    }

    Ok(Alert {
        alert_id,
        timestamp,
        source,
        severity,
        title,
        description,
        metadata,
        risk_score: 0,
        category: String::new(),
        dedup_count: 1,
        correlation_refs: envelope.correlation_refs,
    })
}

/// Classifies severity from title keywords when a producer omits it,
/// split by domain the same way `enricher::category_step` splits
/// network vs. host sources. Falls back to `Low` when nothing matches.
fn classify_severity(source: AlertSource, title: &str) -> Severity {
    let title = title.to_ascii_lowercase();
    match source {
        AlertSource::NidsSignature | AlertSource::NidsAnomaly => {
            if title.contains("exploit") || title.contains("sql injection") || title.contains("rce") {
                Severity::Critical
            } else if title.contains("port scan") || title.contains("beaconing") || title.contains("brute force") {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
        AlertSource::HidsFile | AlertSource::HidsProcess | AlertSource::HidsLog => {
            if title.contains("rootkit") || title.contains("privilege escalation") {
                Severity::Critical
            } else if title.contains("hash mismatch") || title.contains("unexpected process") {
                Severity::Medium
            } else {
                Severity::Low
            }
        }
        AlertSource::Correlation => Severity::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_alert_id_when_absent() {
        let sequence = SequenceCounter::default();
        let raw = br#"{"source":"nids_signature","title":"Port Scan","metadata":{"src_ip":"10.0.0.5"}}"#;
        let alert = normalize(raw, &sequence).unwrap();
        assert!(alert.alert_id.starts_with("nids_signature_0_"));
        // "Port Scan" from a nids_signature source classifies as Medium
        // when the producer doesn't supply a severity.
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn unclassified_title_falls_back_to_low_severity() {
        let sequence = SequenceCounter::default();
        let raw = br#"{"source":"hids_log","title":"Routine login"}"#;
        let alert = normalize(raw, &sequence).unwrap();
        assert_eq!(alert.severity, Severity::Low);
    }

    #[test]
    fn preserves_supplied_alert_id_and_severity() {
        let sequence = SequenceCounter::default();
        let raw = br#"{"source":"hids_file","title":"Hash mismatch","alert_id":"fixed-1","severity":"critical"}"#;
        let alert = normalize(raw, &sequence).unwrap();
        assert_eq!(alert.alert_id, "fixed-1");
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn truncates_oversized_title_and_description() {
        let sequence = SequenceCounter::default();
        let long_title = "x".repeat(MAX_TITLE_LEN + 50);
        let raw = serde_json::json!({
            "source": "hids_log",
            "title": long_title,
        });
        let alert = normalize(raw.to_string().as_bytes(), &sequence).unwrap();
        assert_eq!(alert.title.len(), MAX_TITLE_LEN);
    }
}
