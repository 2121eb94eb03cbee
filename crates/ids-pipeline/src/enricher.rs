use ids_core::Alert;
use tracing::debug;

/// Ordered chain of pure enrichment steps. Each step is side-effect-free
/// and bounded-latency; a failing step is skipped rather than failing the
/// whole alert, so enrichment never blocks the pipeline.
pub struct Enricher {
    steps: Vec<Box<dyn Fn(&mut Alert) -> Result<(), String> + Send + Sync>>,
}

impl Enricher {
    /// Builds the default chain: risk scoring, then category tagging.
    pub fn with_default_steps() -> Self {
        Enricher { steps: vec![Box::new(risk_score_step), Box::new(category_step)] }
    }

    pub fn enrich(&self, alert: &mut Alert, error_counter: &std::sync::atomic::AtomicU64) {
        for step in &self.steps {
            if let Err(reason) = step(alert) {
                debug!(alert_id = %alert.alert_id, reason, "enrichment step skipped");
                error_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
}

/// `risk = severity_numeric * 20 + round(confidence * 20)`, clamped 0..100.
fn risk_score_step(alert: &mut Alert) -> Result<(), String> {
    let confidence = alert
        .metadata
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let base = alert.severity.numeric() as u32 * 20;
    let bonus = (confidence * 20.0).round() as u32;
    alert.risk_score = (base + bonus).min(100) as u8;
    Ok(())
}

/// Derives a dotted category tag from `source` and, when present,
/// `rule_id`.
fn category_step(alert: &mut Alert) -> Result<(), String> {
    let domain = match alert.source {
        ids_core::AlertSource::NidsSignature | ids_core::AlertSource::NidsAnomaly => "network",
        ids_core::AlertSource::HidsFile | ids_core::AlertSource::HidsProcess | ids_core::AlertSource::HidsLog => "host",
        ids_core::AlertSource::Correlation => "correlation",
    };
    let leaf = alert.metadata_str("rule_id").unwrap_or("general");
    alert.category = format!("{domain}.{leaf}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::{AlertSource, Severity};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    fn sample() -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("confidence".to_string(), serde_json::json!(0.75));
        Alert {
            alert_id: "a1".into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsAnomaly,
            severity: Severity::High,
            title: "Beaconing".into(),
            description: String::new(),
            metadata,
            risk_score: 0,
            category: String::new(),
            dedup_count: 1,
            correlation_refs: None,
        }
    }

    #[test]
    fn computes_risk_score_from_severity_and_confidence() {
        let enricher = Enricher::with_default_steps();
        let errors = AtomicU64::new(0);
        let mut alert = sample();
        enricher.enrich(&mut alert, &errors);
        assert_eq!(alert.risk_score, 75);
        assert_eq!(alert.category, "network.general");
        assert_eq!(errors.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn risk_score_is_clamped_to_100() {
        let enricher = Enricher::with_default_steps();
        let errors = AtomicU64::new(0);
        let mut alert = sample();
        alert.severity = Severity::Critical;
        alert.metadata.insert("confidence".to_string(), serde_json::json!(1.0));
        enricher.enrich(&mut alert, &errors);
        assert_eq!(alert.risk_score, 100);
    }
}
