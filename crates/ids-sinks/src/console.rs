use ids_core::{Alert, Severity};

/// Writes one human-readable line per alert to stdout. Non-blocking and
/// infallible in practice; `deliver` still returns `Result` to satisfy the
/// common sink contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn deliver(&self, alert: &Alert) {
        let color = severity_color(alert.severity);
        let src_ip = alert.metadata_str("src_ip").unwrap_or("-");
        let dst_ip = alert.metadata_str("dst_ip").unwrap_or("-");
        println!(
            "\x1b[{color}m[{severity}]\x1b[0m {source} {title} (src={src_ip} dst={dst_ip})",
            severity = alert.severity.as_wire_str(),
            source = alert.source.as_str(),
            title = alert.title,
        );
    }
}

fn severity_color(severity: Severity) -> u8 {
    match severity {
        Severity::Info => 37,
        Severity::Low => 36,
        Severity::Medium => 33,
        Severity::High => 31,
        Severity::Critical => 35,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::AlertSource;
    use std::collections::HashMap;

    #[test]
    fn deliver_does_not_panic() {
        let alert = Alert {
            alert_id: "a1".into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::Critical,
            title: "Port Scan".into(),
            description: String::new(),
            metadata: HashMap::new(),
            risk_score: 90,
            category: "network.scan".into(),
            dedup_count: 1,
            correlation_refs: None,
        };
        ConsoleSink.deliver(&alert);
    }
}
