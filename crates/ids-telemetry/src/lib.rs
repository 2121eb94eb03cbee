//! Logging bootstrap and shared runtime counters for the aggregator and
//! its producers.

use std::collections::HashMap;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber and panic hook.
///
/// Development builds get compact, colorized output; release builds get
/// flattened JSON events suitable for shipping to a log collector. Panics
/// on any thread are logged through `tracing` before the process unwinds,
/// so a crashed worker still leaves a record.
#[instrument(skip_all)]
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{service_name}={level}", level = if cfg!(debug_assertions) { "debug" } else { "info" })
            .into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        error!(target: "panic", service = %service, location = %location, "thread panicked: {payload}");
    }));

    info!(service = %service_name, "tracing initialized");
}

/// Labels for the fixed-size `per_source` counter array, in
/// `ids_core::AlertSource::index()` order.
const SOURCE_LABELS: [&str; 6] =
    ["nids_signature", "nids_anomaly", "hids_file", "hids_process", "hids_log", "correlation"];

/// Labels for the fixed-size `per_severity` counter array, in
/// `ids_core::Severity::numeric()` order.
const SEVERITY_LABELS: [&str; 5] = ["info", "low", "medium", "high", "critical"];

/// Lock-free counters shared across the pipeline stages and surfaced by
/// the `status` CLI subcommand.
#[derive(Debug)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub deduplicated: AtomicU64,
    pub enriched: AtomicU64,
    pub correlation_fired: AtomicU64,
    pub published: AtomicU64,
    pub sink_errors: AtomicU64,
    pub enrichment_errors: AtomicU64,
    pub dropped_in: AtomicU64,
    /// Alerts dropped by a downstream publisher with no active
    /// subscribers to hand them to.
    pub dropped_out: AtomicU64,
    /// Alerts still queued when the shutdown drain deadline elapsed,
    /// abandoned unprocessed.
    pub dropped_shutdown: AtomicU64,
    /// Extra sink redeliveries issued solely to report a dedup window's
    /// final count once it closes, distinct from `published`.
    pub dedup_updates: AtomicU64,
    /// Indexed by `ids_core::AlertSource::index()`.
    pub per_source: [AtomicU64; 6],
    /// Indexed by `ids_core::Severity::numeric()`.
    pub per_severity: [AtomicU64; 5],
}

impl Default for PipelineStats {
    fn default() -> Self {
        PipelineStats {
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            enriched: AtomicU64::new(0),
            correlation_fired: AtomicU64::new(0),
            published: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            enrichment_errors: AtomicU64::new(0),
            dropped_in: AtomicU64::new(0),
            dropped_out: AtomicU64::new(0),
            dropped_shutdown: AtomicU64::new(0),
            dedup_updates: AtomicU64::new(0),
            per_source: std::array::from_fn(|_| AtomicU64::new(0)),
            per_severity: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl PipelineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            correlation_fired: self.correlation_fired.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            enrichment_errors: self.enrichment_errors.load(Ordering::Relaxed),
            dropped_in: self.dropped_in.load(Ordering::Relaxed),
            dropped_out: self.dropped_out.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            dedup_updates: self.dedup_updates.load(Ordering::Relaxed),
            per_source: SOURCE_LABELS
                .iter()
                .zip(self.per_source.iter())
                .map(|(label, counter)| (label.to_string(), counter.load(Ordering::Relaxed)))
                .collect(),
            per_severity: SEVERITY_LABELS
                .iter()
                .zip(self.per_severity.iter())
                .map(|(label, counter)| (label.to_string(), counter.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`], serialized to `status.json`.
/// Per-source/per-severity breakdowns are keyed by label rather than
/// index so the JSON output is self-describing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineStatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub deduplicated: u64,
    pub enriched: u64,
    pub correlation_fired: u64,
    pub published: u64,
    pub sink_errors: u64,
    pub enrichment_errors: u64,
    pub dropped_in: u64,
    pub dropped_out: u64,
    pub dropped_shutdown: u64,
    pub dedup_updates: u64,
    pub per_source: HashMap<String, u64>,
    pub per_severity: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = PipelineStats::default();
        PipelineStats::incr(&stats.received);
        PipelineStats::incr(&stats.received);
        PipelineStats::incr(&stats.malformed);
        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.malformed, 1);
    }

    #[test]
    fn per_source_and_per_severity_counters_are_labeled_on_snapshot() {
        let stats = PipelineStats::default();
        // index 2 is hids_file, index 4 is critical; see SOURCE_LABELS/SEVERITY_LABELS.
        stats.per_source[2].fetch_add(3, Ordering::Relaxed);
        stats.per_severity[4].fetch_add(2, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.per_source.get("hids_file"), Some(&3));
        assert_eq!(snap.per_severity.get("critical"), Some(&2));
    }
}
