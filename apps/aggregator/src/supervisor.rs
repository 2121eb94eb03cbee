use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ids_pipeline::AlertManager;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::status::ProducerStatus;

#[derive(Error, Debug)]
enum SupervisorError {
    #[error("producer `{label}` silent for {silent_secs:.1}s, past the {threshold_secs:.1}s liveness threshold")]
    ProducerUnhealthy { label: &'static str, silent_secs: f64, threshold_secs: f64 },
}

/// A supervised producer process: which binary to run, how to reach it
/// once it's listening, and the source label the alert manager tracks
/// its heartbeats under.
pub struct ProducerSpec {
    pub label: &'static str,
    pub binary: PathBuf,
    pub bind_addr: String,
    /// Source label passed to `AlertManager::spawn_receiver` for this
    /// producer. Used to read its last-alert-received timestamp for the
    /// heartbeat liveness check.
    pub heartbeat_source: &'static str,
}

/// Shared, lock-free view of one producer's supervision state, read by
/// the status-writer task without touching the supervising loop.
#[derive(Default)]
pub struct ProducerHealth {
    running: AtomicBool,
    restart_count: AtomicU32,
}

impl ProducerHealth {
    pub fn snapshot(&self) -> ProducerStatus {
        ProducerStatus {
            running: self.running.load(Ordering::Relaxed),
            restart_count: self.restart_count.load(Ordering::Relaxed),
        }
    }
}

/// Resolves a producer binary's path: `IDS_PRODUCER_BIN_DIR` if set,
/// otherwise the directory this binary itself was launched from (all
/// four binaries land in the same `target/{debug,release}` directory).
pub fn producer_binary_path(name: &str) -> PathBuf {
    let dir = std::env::var_os("IDS_PRODUCER_BIN_DIR")
        .map(PathBuf::from)
        .or_else(|| std::env::current_exe().ok().and_then(|p| p.parent().map(|p| p.to_path_buf())))
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(name)
}

/// Spawns the supervising task for one producer. The task restarts the
/// child on every exit with exponential backoff (capped at
/// `backoff_cap`), resetting to a 1s backoff once a child has stayed up
/// for 5 minutes straight. Independently of process exit, a heartbeat
/// check force-restarts a child that has gone silent (no alerts reaching
/// `manager`) for `3 * heartbeat_interval`.
pub fn spawn(
    spec: ProducerSpec,
    backoff_cap_ms: u64,
    heartbeat_interval_ms: u64,
    manager: Arc<AlertManager>,
    shutdown: CancellationToken,
) -> (JoinHandle<()>, Arc<ProducerHealth>) {
    let health = Arc::new(ProducerHealth::default());
    let task_health = health.clone();
    let handle = tokio::spawn(supervise(
        spec,
        Duration::from_millis(backoff_cap_ms),
        Duration::from_millis(heartbeat_interval_ms),
        manager,
        shutdown,
        task_health,
    ));
    (handle, health)
}

async fn supervise(
    spec: ProducerSpec,
    backoff_cap: Duration,
    heartbeat_interval: Duration,
    manager: Arc<AlertManager>,
    shutdown: CancellationToken,
    health: Arc<ProducerHealth>,
) {
    const HEALTHY_UPTIME: Duration = Duration::from_secs(5 * 60);
    let unhealthy_threshold = heartbeat_interval.saturating_mul(3);
    let mut backoff = Duration::from_secs(1);

    while !shutdown.is_cancelled() {
        info!(producer = spec.label, binary = %spec.binary.display(), "starting producer process");
        let mut child = match Command::new(&spec.binary).arg("--bind").arg(&spec.bind_addr).kill_on_drop(true).spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(producer = spec.label, error = %err, "failed to spawn producer process, backing off");
                health.restart_count.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(backoff_cap);
                continue;
            }
        };
        health.running.store(true, Ordering::Relaxed);
        manager.note_producer_started(spec.heartbeat_source);
        let started_at = Instant::now();

        let mut heartbeat_check = tokio::time::interval(heartbeat_interval);
        heartbeat_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat_check.tick().await; // first tick fires immediately

        let exit_reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break ExitReason::Shutdown,
                status = child.wait() => break ExitReason::Exited(status),
                _ = heartbeat_check.tick() => {
                    let silent_secs = manager.seconds_since_last_seen(spec.heartbeat_source).unwrap_or(0.0);
                    if Duration::from_secs_f64(silent_secs) >= unhealthy_threshold {
                        let err = SupervisorError::ProducerUnhealthy {
                            label: spec.label,
                            silent_secs,
                            threshold_secs: unhealthy_threshold.as_secs_f64(),
                        };
                        error!(producer = spec.label, error = %err, "producer heartbeat lost, forcing restart");
                        let _ = child.start_kill();
                        let status = child.wait().await;
                        break ExitReason::Unhealthy(status);
                    }
                }
            }
        };

        health.running.store(false, Ordering::Relaxed);
        match exit_reason {
            ExitReason::Shutdown => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                break;
            }
            ExitReason::Exited(Ok(status)) => warn!(producer = spec.label, ?status, "producer process exited"),
            ExitReason::Exited(Err(err)) => error!(producer = spec.label, error = %err, "error waiting on producer process"),
            ExitReason::Unhealthy(_) => {}
        }

        if shutdown.is_cancelled() {
            break;
        }

        if started_at.elapsed() >= HEALTHY_UPTIME {
            backoff = Duration::from_secs(1);
        } else {
            backoff = (backoff * 2).min(backoff_cap);
        }
        health.restart_count.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(backoff).await;
    }
}

enum ExitReason {
    Shutdown,
    Exited(std::io::Result<std::process::ExitStatus>),
    Unhealthy(std::io::Result<std::process::ExitStatus>),
}
