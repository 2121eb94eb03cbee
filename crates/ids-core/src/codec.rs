use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::alert::{Alert, AlertSource, Severity};

/// Payloads larger than this are rejected outright.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// The only failure kind the codec produces. Malformed input is always
/// dropped and counted by the caller — this type exists so the reason
/// can still be logged and asserted on in tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedAlert {
    #[error("payload of {0} bytes exceeds the {max} byte cap", max = MAX_PAYLOAD_BYTES)]
    PayloadTooLarge(usize),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown alert source `{0}`")]
    UnknownSource(String),
    #[error("metadata value for `{0}` is not a JSON scalar")]
    InvalidMetadataValue(String),
}

/// A producer's raw alert, decoded but not yet normalized. Every field
/// beyond `source` and `title` is optional — the normalizer fills in the
/// rest.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub correlation_refs: Option<Vec<String>>,
}

/// Decodes and validates a raw producer payload.
///
/// This only performs the envelope-level checks the codec owns: size cap,
/// JSON syntax, known `source`, and metadata values restricted to JSON
/// scalars. It does not default `timestamp`/`severity` or assign an
/// `alert_id` — that belongs to the normalizer.
pub fn decode_envelope(bytes: &[u8]) -> Result<RawEnvelope, MalformedAlert> {
    if bytes.len() > MAX_PAYLOAD_BYTES {
        return Err(MalformedAlert::PayloadTooLarge(bytes.len()));
    }

    let envelope: RawEnvelope =
        serde_json::from_slice(bytes).map_err(|e| MalformedAlert::InvalidJson(e.to_string()))?;

    if envelope.title.trim().is_empty() {
        return Err(MalformedAlert::MissingField("title"));
    }

    if AlertSource::parse(&envelope.source).is_none() {
        return Err(MalformedAlert::UnknownSource(envelope.source.clone()));
    }

    for (key, value) in &envelope.metadata {
        if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            return Err(MalformedAlert::InvalidMetadataValue(key.clone()));
        }
    }

    if let Some(severity) = &envelope.severity {
        if Severity::parse_lenient(severity).is_none() {
            // Unrecognized severity text is not fatal — the normalizer
            // maps it through a table and falls back to the default, so
            // the codec only rejects structurally invalid payloads.
        }
    }

    Ok(envelope)
}

/// Encodes a canonical alert to the bit-exact wire schema.
///
/// Field order is not significant; this returns one compact JSON line
/// suitable for the file sink and the downstream publisher.
pub fn encode_alert(alert: &Alert) -> String {
    #[derive(serde::Serialize)]
    struct Wire<'a> {
        alert_id: &'a str,
        timestamp: String,
        source: &'a str,
        severity: &'a str,
        severity_num: u8,
        title: &'a str,
        description: &'a str,
        metadata: &'a HashMap<String, Value>,
        risk_score: u8,
        category: &'a str,
        dedup_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_refs: &'a Option<Vec<String>>,
    }

    let wire = Wire {
        alert_id: &alert.alert_id,
        timestamp: alert.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        source: alert.source.as_str(),
        severity: alert.severity.as_wire_str(),
        severity_num: alert.severity.numeric(),
        title: &alert.title,
        description: &alert.description,
        metadata: &alert.metadata,
        risk_score: alert.risk_score,
        category: &alert.category,
        dedup_count: alert.dedup_count,
        correlation_refs: &alert.correlation_refs,
    };

    serde_json::to_string(&wire).expect("canonical alert always serializes")
}

/// Decodes a canonical wire alert back into an [`Alert`], used for
/// round-trip tests and for consumers of the downstream publisher feed.
pub fn decode_alert(bytes: &[u8]) -> Result<Alert, MalformedAlert> {
    serde_json::from_slice(bytes).map_err(|e| MalformedAlert::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_payload() {
        let huge = vec![b'a'; MAX_PAYLOAD_BYTES + 1];
        assert_eq!(decode_envelope(&huge), Err(MalformedAlert::PayloadTooLarge(huge.len())));
    }

    #[test]
    fn rejects_unknown_source() {
        let raw = br#"{"source":"carrier_pigeon","title":"x"}"#;
        assert!(matches!(decode_envelope(raw), Err(MalformedAlert::UnknownSource(_))));
    }

    #[test]
    fn accepts_minimal_envelope() {
        let raw = br#"{"source":"nids_signature","title":"Port Scan"}"#;
        let env = decode_envelope(raw).unwrap();
        assert_eq!(env.source, "nids_signature");
        assert!(env.timestamp.is_none());
        assert!(env.severity.is_none());
    }

    #[test]
    fn round_trip_is_value_equal() {
        let alert = Alert {
            alert_id: "nids_signature_1_1690000000000000".into(),
            timestamp: Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::High,
            title: "Port Scan".into(),
            description: String::new(),
            metadata: HashMap::new(),
            risk_score: 60,
            category: "network.scan".into(),
            dedup_count: 1,
            correlation_refs: None,
        };
        let encoded = encode_alert(&alert);
        let decoded = decode_alert(encoded.as_bytes()).unwrap();
        let original_value: Value = serde_json::from_str(&encoded).unwrap();
        let round_tripped_value: Value = serde_json::from_str(&encode_alert(&decoded)).unwrap();
        assert_eq!(original_value, round_tripped_value);
    }
}
