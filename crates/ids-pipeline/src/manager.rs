use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use ids_config::{CorrelatorConfig, ManagerConfig};
use ids_core::correlation::CorrelationRule;
use ids_core::{Alert, AlertSource, Fingerprint};
use ids_sinks::Sink;
use ids_telemetry::{PipelineStats, PipelineStatsSnapshot};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::correlator::EventCorrelator;
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::enricher::Enricher;
use crate::normalizer::{normalize, SequenceCounter};

/// One alert handed from a worker to the correlator task, paired with a
/// reply channel for whatever correlation alerts it fires.
struct CorrelatorRequest {
    alert: Alert,
    reply: oneshot::Sender<Vec<Alert>>,
}

/// Everything that can be sent to the single-writer correlator task.
enum CorrelatorMsg {
    Ingest(CorrelatorRequest),
    ReloadRules(Vec<CorrelationRule>),
}

/// Bounded intake queue, fixed worker pool, and the single-writer
/// correlator task, wired together per the concurrency model: one
/// receiver task per producer endpoint feeds a shared intake queue, a
/// fixed pool of workers drains it, and exactly one task owns the
/// correlator.
pub struct AlertManager {
    intake_tx: mpsc::Sender<Alert>,
    correlator_tx: mpsc::UnboundedSender<CorrelatorMsg>,
    dedup: Mutex<Deduplicator>,
    /// The currently-live, first-dispatched copy of each in-window
    /// fingerprint. Updated in place as duplicates arrive so the final
    /// `dedup_count` can be reported to sinks once, when the fingerprint
    /// is evicted from `dedup`, without delaying the first occurrence's
    /// real-time delivery.
    pending_dedup: Mutex<HashMap<Fingerprint, Alert>>,
    enricher: Enricher,
    sinks: Vec<Sink>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    /// Sequence counter for the synchronous [`AlertManager::ingest_raw`]
    /// path. Network receivers each own their own counter instead, since
    /// per-source ordering is scoped to a single producer connection.
    sequence: SequenceCounter,
    /// Last time any frame was received from each producer, used by the
    /// aggregator's supervisor to detect a hung-but-not-exited producer.
    last_seen: StdMutex<HashMap<&'static str, Instant>>,
}

impl AlertManager {
    /// Builds the manager, spawns the correlator task, and spawns the
    /// worker pool. Receiver tasks are started separately via
    /// [`AlertManager::spawn_receiver`] once the caller knows the
    /// producer endpoints.
    pub fn spawn(
        manager_config: &ManagerConfig,
        correlator_config: &CorrelatorConfig,
        sinks: Vec<Sink>,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (intake_tx, intake_rx) = mpsc::channel(manager_config.intake_capacity);
        let (correlator_tx, correlator_rx) = mpsc::unbounded_channel();

        let correlator = EventCorrelator::new(correlator_config.rules.clone(), correlator_config.effective_max_history_window_ms());
        tokio::spawn(run_correlator_task(correlator, correlator_rx, correlator_config.enabled, shutdown.clone()));

        let manager = Arc::new(AlertManager {
            intake_tx,
            correlator_tx,
            dedup: Mutex::new(Deduplicator::new(manager_config.dedup_window_ms, manager_config.dedup_max_entries)),
            pending_dedup: Mutex::new(HashMap::new()),
            enricher: Enricher::with_default_steps(),
            sinks,
            stats,
            shutdown,
            sequence: SequenceCounter::default(),
            last_seen: StdMutex::new(HashMap::new()),
        });

        let intake_rx = Arc::new(Mutex::new(intake_rx));
        for worker_id in 0..manager_config.worker_count {
            spawn_worker(worker_id, manager.clone(), intake_rx.clone());
        }

        tokio::spawn(dedup_eviction_loop(manager.clone(), manager_config.dedup_evict_interval_ms));

        manager
    }

    /// Connects to a producer endpoint and spawns its dedicated receiver
    /// task: decode, normalize, dedup, enrich, then push to intake.
    /// Reconnects with a fixed backoff if the producer drops the
    /// connection or isn't reachable yet.
    pub fn spawn_receiver(self: &Arc<Self>, source_label: &'static str, addr: SocketAddr) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(receiver_loop(manager, source_label, addr))
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Records that a producer has just been (re)started, so a brief
    /// startup delay before its first alert isn't mistaken for staleness.
    pub fn note_producer_started(&self, source_label: &'static str) {
        self.last_seen.lock().unwrap().insert(source_label, Instant::now());
    }

    /// Seconds since any frame (malformed or not) was last received from
    /// `source_label`. `None` if nothing has ever been recorded for it.
    pub fn seconds_since_last_seen(&self, source_label: &str) -> Option<f64> {
        self.last_seen.lock().unwrap().get(source_label).map(|t| t.elapsed().as_secs_f64())
    }

    fn note_alert_received(&self, source_label: &'static str) {
        self.last_seen.lock().unwrap().insert(source_label, Instant::now());
    }

    /// Pushes a freshly loaded rule set into the correlator task. Event
    /// history and cooldown state carry over; only the rule definitions
    /// change. Silently a no-op if the correlator task has already shut
    /// down.
    pub fn reload_rules(&self, rules: Vec<CorrelationRule>) {
        let _ = self.correlator_tx.send(CorrelatorMsg::ReloadRules(rules));
    }

    /// Trips the shared shutdown signal, then waits up to `grace` for the
    /// intake queue to drain. Anything still queued past the deadline is
    /// abandoned in place and counted as `dropped_shutdown`; workers
    /// finish whatever alert they're holding.
    pub async fn shutdown_and_drain(&self, grace: Duration) {
        self.shutdown.cancel();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.intake_tx.capacity() == self.intake_tx.max_capacity() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let outstanding = self.intake_tx.max_capacity() - self.intake_tx.capacity();
        if outstanding > 0 {
            warn!(outstanding, "shutdown grace period elapsed, abandoning queued alerts");
            self.stats.dropped_shutdown.fetch_add(outstanding as u64, Ordering::Relaxed);
        }
    }

    /// Decodes, normalizes, dedups, enriches, and dispatches one raw
    /// producer payload synchronously, bypassing the intake queue. This
    /// is the same per-alert pipeline a receiver task drives, exposed
    /// directly so integration tests can feed the pipeline without real
    /// sockets.
    pub async fn ingest_raw(&self, bytes: &[u8]) -> Result<(), ids_core::MalformedAlert> {
        if let Some(alert) = self.normalize_dedup_enrich(bytes, &self.sequence).await? {
            self.dispatch(alert).await;
        }
        Ok(())
    }

    async fn normalize_dedup_enrich(&self, bytes: &[u8], sequence: &SequenceCounter) -> Result<Option<Alert>, ids_core::MalformedAlert> {
        PipelineStats::incr(&self.stats.received);
        let mut alert = match normalize(bytes, sequence) {
            Ok(alert) => alert,
            Err(err) => {
                PipelineStats::incr(&self.stats.malformed);
                return Err(err);
            }
        };

        let now = Instant::now();
        let outcome = { self.dedup.lock().await.check(&alert, now) };
        if let DedupOutcome::Suppressed { count, .. } = outcome {
            PipelineStats::incr(&self.stats.deduplicated);
            self.update_pending_dedup_count(&alert, count).await;
            return Ok(None);
        }

        self.enricher.enrich(&mut alert, &self.stats.enrichment_errors);
        PipelineStats::incr(&self.stats.enriched);
        self.record_source_and_severity(&alert);
        Ok(Some(alert))
    }

    fn record_source_and_severity(&self, alert: &Alert) {
        self.stats.per_source[alert.source.index()].fetch_add(1, Ordering::Relaxed);
        self.stats.per_severity[alert.severity.numeric() as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Remembers `alert` as the currently-live dispatched copy for its
    /// dedup fingerprint, so a later suppressed duplicate's count lands
    /// on this same alert when the window closes.
    async fn track_pending_dedup(&self, alert: &Alert) {
        let key = Deduplicator::key_for(alert);
        self.pending_dedup.lock().await.insert(key, alert.clone());
    }

    async fn update_pending_dedup_count(&self, alert: &Alert, count: u32) {
        let key = Deduplicator::key_for(alert);
        if let Some(pending) = self.pending_dedup.lock().await.get_mut(&key) {
            pending.dedup_count = count;
        }
    }

    async fn dispatch(&self, alert: Alert) {
        let now = Instant::now();
        let fired = if alert.source != AlertSource::Correlation {
            self.run_correlator(alert.clone()).await
        } else {
            Vec::new()
        };

        self.track_pending_dedup(&alert).await;
        self.deliver_to_sinks(&alert).await;

        for mut corr_alert in fired {
            PipelineStats::incr(&self.stats.correlation_fired);

            let outcome = { self.dedup.lock().await.check(&corr_alert, now) };
            match outcome {
                DedupOutcome::Suppressed { count, .. } => {
                    PipelineStats::incr(&self.stats.deduplicated);
                    self.update_pending_dedup_count(&corr_alert, count).await;
                    continue;
                }
                DedupOutcome::Pass => {}
            }

            self.enricher.enrich(&mut corr_alert, &self.stats.enrichment_errors);
            PipelineStats::incr(&self.stats.enriched);
            self.record_source_and_severity(&corr_alert);
            self.track_pending_dedup(&corr_alert).await;
            self.deliver_to_sinks(&corr_alert).await;
        }
    }

    async fn run_correlator(&self, alert: Alert) -> Vec<Alert> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = CorrelatorMsg::Ingest(CorrelatorRequest { alert, reply: reply_tx });
        if self.correlator_tx.send(msg).is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Delivers to every enabled sink in turn, retrying once on failure
    /// before dropping and counting — other sinks still receive the
    /// alert regardless of one sink's failure.
    async fn deliver_to_sinks_raw(&self, alert: &Alert) {
        for sink in &self.sinks {
            if let Err(err) = sink.deliver(alert).await {
                warn!(sink = sink.name(), error = %err, "sink delivery failed, retrying once");
                if let Err(err) = sink.deliver(alert).await {
                    error!(sink = sink.name(), error = %err, "sink delivery failed twice, dropping for this sink");
                    PipelineStats::incr(&self.stats.sink_errors);
                }
            }
        }
    }

    async fn deliver_to_sinks(&self, alert: &Alert) {
        self.deliver_to_sinks_raw(alert).await;
        PipelineStats::incr(&self.stats.published);
    }

    /// Re-delivers the pending copy of a fingerprint once its dedup
    /// window closes, carrying the final accumulated `dedup_count`.
    /// Counted separately from `published` since it isn't a new alert
    /// occurrence, just an updated report of one already delivered.
    async fn deliver_dedup_update(&self, alert: &Alert) {
        self.deliver_to_sinks_raw(alert).await;
        PipelineStats::incr(&self.stats.dedup_updates);
    }
}

/// Periodically sweeps expired dedup fingerprints. A fingerprint that was
/// ever suppressed (`count > 1`) gets its pending alert re-delivered once
/// more here, carrying the final count — this is the only place a
/// duplicate's accumulated count ever reaches the sinks, since the first
/// occurrence dispatches in real time before later duplicates are known.
async fn dedup_eviction_loop(manager: Arc<AlertManager>, interval_ms: u64) {
    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = manager.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = { manager.dedup.lock().await.evict_expired(Instant::now()) };
                for (key, entry) in evicted {
                    let pending = { manager.pending_dedup.lock().await.remove(&key) };
                    let Some(mut alert) = pending else { continue };
                    if entry.count > 1 {
                        alert.dedup_count = entry.count;
                        manager.deliver_dedup_update(&alert).await;
                    }
                }
            }
        }
    }
}

fn spawn_worker(worker_id: usize, manager: Arc<AlertManager>, intake_rx: Arc<Mutex<mpsc::Receiver<Alert>>>) {
    tokio::spawn(async move {
        loop {
            let handle: JoinHandle<()> = tokio::spawn(worker_loop(manager.clone(), intake_rx.clone()));
            match handle.await {
                Ok(()) => break,
                Err(join_err) if join_err.is_panic() => {
                    error!(worker_id, "worker task panicked, respawning to keep pool size invariant");
                    continue;
                }
                Err(_) => break,
            }
        }
    });
}

async fn worker_loop(manager: Arc<AlertManager>, intake_rx: Arc<Mutex<mpsc::Receiver<Alert>>>) {
    loop {
        let maybe_alert = tokio::select! {
            biased;
            _ = manager.shutdown.cancelled() => None,
            alert = async { intake_rx.lock().await.recv().await } => alert,
        };
        let Some(alert) = maybe_alert else { break };
        manager.dispatch(alert).await;
    }
}

async fn run_correlator_task(
    mut correlator: EventCorrelator,
    mut rx: mpsc::UnboundedReceiver<CorrelatorMsg>,
    enabled: bool,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            maybe_msg = rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                match msg {
                    CorrelatorMsg::Ingest(req) => {
                        let fired = if enabled { correlator.ingest(&req.alert, Instant::now()) } else { Vec::new() };
                        let _ = req.reply.send(fired);
                    }
                    CorrelatorMsg::ReloadRules(rules) => {
                        info!(rule_count = rules.len(), "correlator rule set reloaded");
                        correlator.replace_rules(rules);
                    }
                }
            }
        }
    }
}

async fn receiver_loop(manager: Arc<AlertManager>, source_label: &'static str, addr: SocketAddr) {
    let sequence = SequenceCounter::default();

    while !manager.shutdown.is_cancelled() {
        let socket = match TcpStream::connect(addr).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%addr, error = %err, "receiver could not connect to producer, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
        info!(%addr, source = source_label, "receiver connected to producer");

        loop {
            let frame = tokio::select! {
                biased;
                _ = manager.shutdown.cancelled() => None,
                frame = framed.next() => frame,
            };
            let Some(frame) = frame else { break };

            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%addr, error = %err, "receiver frame read failed");
                    break;
                }
            };
            manager.note_alert_received(source_label);

            let alert = match manager.normalize_dedup_enrich(&bytes, &sequence).await {
                Ok(Some(alert)) => alert,
                Ok(None) => continue,
                Err(err) => {
                    debug!(source = source_label, error = %err, "malformed alert dropped");
                    continue;
                }
            };

            match manager.intake_tx.try_send(alert) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    manager.stats.dropped_in.fetch_add(1, Ordering::Relaxed);
                    info!(source = source_label, "intake queue full, dropping newest alert");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }

        if manager.shutdown.is_cancelled() {
            break;
        }
        warn!(%addr, source = source_label, "receiver disconnected from producer, reconnecting");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::correlation::{CorrelationRule, EventMatcher};
    use ids_core::Severity;
    use ids_sinks::ConsoleSink;
    use std::collections::HashMap;

    fn sample(title: &str, src_ip: &str) -> Alert {
        let mut metadata = HashMap::new();
        metadata.insert("src_ip".to_string(), serde_json::json!(src_ip));
        Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
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

    fn test_manager() -> Arc<AlertManager> {
        let manager_config = ManagerConfig::default();
        let correlator_config = CorrelatorConfig {
            enabled: true,
            max_history_window_ms: Some(900_000),
            cooldown_policy: "per_rule_window".into(),
            rules: vec![CorrelationRule {
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
            }],
        };
        AlertManager::spawn(
            &manager_config,
            &correlator_config,
            vec![Sink::Console(ConsoleSink)],
            Arc::new(PipelineStats::default()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn dispatch_publishes_and_counts_stats() {
        let manager = test_manager();
        manager.dispatch(sample("Port Scan", "10.0.0.5")).await;
        let snap = manager.stats();
        assert_eq!(snap.published, 1);
        assert_eq!(snap.correlation_fired, 0);
    }

    #[tokio::test]
    async fn correlated_pair_fires_and_publishes_the_synthetic_alert() {
        let manager = test_manager();
        manager.dispatch(sample("Port Scan", "10.0.0.5")).await;
        let mut exploit = sample("SQL Injection", "10.0.0.5");
        exploit.severity = Severity::High;
        manager.dispatch(exploit).await;

        let snap = manager.stats();
        assert_eq!(snap.published, 3);
        assert_eq!(snap.correlation_fired, 1);
    }

    #[tokio::test]
    async fn shutdown_and_drain_returns_once_intake_is_empty() {
        let manager = test_manager();
        manager.shutdown_and_drain(Duration::from_millis(200)).await;
        assert!(manager.shutdown.is_cancelled());
    }
}
