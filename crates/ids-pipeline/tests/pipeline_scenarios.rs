//! End-to-end scenarios driven fully in-process, without real sockets:
//! raw producer payloads go in through `AlertManager::ingest_raw`, and
//! the resulting sink/correlator counters come out through `stats()`.

use std::sync::Arc;
use std::time::Duration;

use ids_config::{CorrelatorConfig, ManagerConfig};
use ids_core::correlation::{CorrelationRule, EventMatcher};
use ids_core::{AlertSource, Severity};
use ids_pipeline::AlertManager;
use ids_sinks::{ConsoleSink, FileSink, Sink};
use ids_telemetry::PipelineStats;
use tokio_util::sync::CancellationToken;

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

fn manager_with_rules(rules: Vec<CorrelationRule>) -> Arc<AlertManager> {
    let manager_config = ManagerConfig::default();
    let correlator_config = CorrelatorConfig {
        enabled: true,
        max_history_window_ms: Some(900_000),
        cooldown_policy: "per_rule_window".into(),
        rules,
    };
    AlertManager::spawn(
        &manager_config,
        &correlator_config,
        vec![Sink::Console(ConsoleSink)],
        Arc::new(PipelineStats::default()),
        CancellationToken::new(),
    )
}

const SCAN: &[u8] = br#"{"source":"nids_signature","title":"Port Scan","metadata":{"src_ip":"10.0.0.5"}}"#;

/// Builds a manager backed by a real file sink, so tests can assert on
/// the literal content delivered to a sink rather than only on stats.
fn manager_with_file_sink(
    manager_config: ManagerConfig,
) -> (Arc<AlertManager>, std::path::PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unified_alerts.jsonl");
    let shutdown = CancellationToken::new();
    let sink = ids_sinks::FileSink::spawn(path.clone(), 1, 20, None, shutdown.clone());
    let correlator_config = CorrelatorConfig {
        enabled: true,
        max_history_window_ms: Some(900_000),
        cooldown_policy: "per_rule_window".into(),
        rules: vec![],
    };
    let manager = AlertManager::spawn(
        &manager_config,
        &correlator_config,
        vec![Sink::File(sink)],
        Arc::new(PipelineStats::default()),
        shutdown,
    );
    (manager, path, dir)
}

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Scenario 1: a single signature alert reaches the sink exactly once,
/// and its missing severity classifies from the title as at least
/// MEDIUM with a risk score of at least 40.
#[tokio::test]
async fn single_alert_is_published_once() {
    let (manager, path, _dir) = manager_with_file_sink(ManagerConfig::default());
    manager.ingest_raw(SCAN).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = manager.stats();
    assert_eq!(snap.received, 1);
    assert_eq!(snap.published, 1);
    assert_eq!(snap.malformed, 0);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert!(lines[0]["severity_num"].as_u64().unwrap() >= 2);
    assert!(lines[0]["risk_score"].as_u64().unwrap() >= 40);
}

/// Scenario 2: ten identical inputs within the dedup window suppress
/// down to a single fingerprint. The first occurrence dispatches in
/// real time; once the (short, test-only) dedup window closes, the
/// periodic eviction sweep reports the fingerprint's final dedup_count
/// to the sinks.
#[tokio::test]
async fn ten_identical_alerts_collapse_to_one_published() {
    let manager_config = ManagerConfig { dedup_window_ms: 150, dedup_evict_interval_ms: 30, ..ManagerConfig::default() };
    let (manager, path, _dir) = manager_with_file_sink(manager_config);
    for _ in 0..10 {
        manager.ingest_raw(SCAN).await.unwrap();
    }

    let snap = manager.stats();
    assert_eq!(snap.received, 10);
    assert_eq!(snap.published, 1);
    assert_eq!(snap.deduplicated, 9);

    // wait past the dedup window and an eviction tick for the final
    // count update to reach the sink
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.stats().dedup_updates, 1);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 2, "expected the first dispatch plus one dedup-count update");
    assert_eq!(lines[0]["dedup_count"].as_u64().unwrap(), 1);
    assert_eq!(lines[1]["dedup_count"].as_u64().unwrap(), 10);
}

/// Scenario 3: a port scan followed by an exploit from the same source
/// IP within the rule's window fires the correlation rule, yielding
/// three total published alerts (the two inputs plus the synthetic one).
#[tokio::test]
async fn scan_then_exploit_fires_correlation() {
    let manager = manager_with_rules(vec![scan_then_exploit_rule()]);

    manager.ingest_raw(SCAN).await.unwrap();
    let exploit = br#"{"source":"nids_signature","title":"SQL Injection","metadata":{"src_ip":"10.0.0.5"}}"#;
    manager.ingest_raw(exploit).await.unwrap();

    let snap = manager.stats();
    assert_eq!(snap.published, 3);
    assert_eq!(snap.correlation_fired, 1);
}

/// Scenario 4: the same pair of alerts from different source IPs never
/// shares an actor, so the rule does not fire.
#[tokio::test]
async fn different_source_ips_do_not_correlate() {
    let manager = manager_with_rules(vec![scan_then_exploit_rule()]);

    manager.ingest_raw(SCAN).await.unwrap();
    let exploit = br#"{"source":"nids_signature","title":"SQL Injection","metadata":{"src_ip":"10.0.0.9"}}"#;
    manager.ingest_raw(exploit).await.unwrap();

    let snap = manager.stats();
    assert_eq!(snap.published, 2);
    assert_eq!(snap.correlation_fired, 0);
}

/// A malformed payload (unknown source) is dropped and counted, never
/// reaching the sinks.
#[tokio::test]
async fn malformed_payload_is_dropped_and_counted() {
    let manager = manager_with_rules(vec![]);
    let bad = br#"{"source":"carrier_pigeon","title":"x"}"#;
    assert!(manager.ingest_raw(bad).await.is_err());

    let snap = manager.stats();
    assert_eq!(snap.malformed, 1);
    assert_eq!(snap.published, 0);
}

#[tokio::test]
async fn shutdown_and_drain_trips_the_shared_signal() {
    let manager = manager_with_rules(vec![]);
    manager.ingest_raw(SCAN).await.unwrap();
    manager.shutdown_and_drain(Duration::from_millis(100)).await;
    // A second ingest still runs synchronously (ingest_raw bypasses the
    // intake queue), but receivers and workers would now be exiting.
    assert_eq!(manager.stats().published, 1);
}
