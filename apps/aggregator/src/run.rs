use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ids_config::Config;
use ids_messaging::Publisher;
use ids_pipeline::AlertManager;
use ids_sinks::{ConsoleSink, FileSink, PublisherSink, Sink};
use ids_telemetry::PipelineStats;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pidfile;
use crate::status::{self, StatusReport};
use crate::supervisor::{self, ProducerHealth, ProducerSpec};

/// How the foreground run ended, distinguishing an operator interrupt
/// (SIGINT) from every other clean shutdown path so `main` can choose
/// the right exit code.
#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Clean,
    Interrupted,
}

/// Mirrors the error taxonomy's startup-time kinds, each mapping to a
/// distinct process exit code in `main`.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("configuration error: {0}")]
    Config(anyhow::Error),
    #[error("startup failure: {0}")]
    Startup(anyhow::Error),
    #[error("runtime failure: {0}")]
    Runtime(anyhow::Error),
}

enum ShutdownCause {
    Interrupted,
    Terminated,
}

/// Runs the aggregator in the foreground: builds the pipeline, spawns
/// the three producer receivers and their supervised child processes,
/// and blocks until a shutdown signal arrives.
pub async fn start(
    config_path: Option<PathBuf>,
    pidfile_path: &Path,
    status_path: PathBuf,
) -> Result<StartOutcome, StartError> {
    let config = ids_config::load(config_path.as_deref()).map_err(|err| StartError::Config(err.into()))?;
    pidfile::write(pidfile_path).map_err(|err| StartError::Startup(err.into()))?;
    let started_at = Utc::now();

    let shutdown = CancellationToken::new();
    let stats = Arc::new(PipelineStats::default());
    let sinks = build_sinks(&config, stats.clone(), shutdown.clone()).await.map_err(StartError::Startup)?;

    let manager = AlertManager::spawn(&config.manager, &config.correlator, sinks, stats, shutdown.clone());
    spawn_receivers(&manager, &config).map_err(StartError::Startup)?;

    let producer_health = spawn_producers(&config, manager.clone(), shutdown.clone());

    let mut status_task = tokio::spawn(status_writer_loop(
        manager.clone(),
        producer_health,
        shutdown.clone(),
        status_path,
        started_at,
        config.supervisor.heartbeat_interval_ms,
    ));

    let outcome = tokio::select! {
        biased;
        cause = signal_loop(manager.clone(), config_path, shutdown.clone()) => {
            match cause {
                ShutdownCause::Interrupted => StartOutcome::Interrupted,
                ShutdownCause::Terminated => StartOutcome::Clean,
            }
        }
        join_result = &mut status_task => {
            // the status writer only exits once `shutdown` trips; seeing
            // it end before that means it panicked or returned early
            shutdown.cancel();
            let err = match join_result {
                Ok(()) => anyhow::anyhow!("status writer task exited before shutdown was requested"),
                Err(join_err) => anyhow::Error::new(join_err),
            };
            return Err(StartError::Runtime(err));
        }
    };

    info!(grace_ms = config.shutdown_grace_ms, "draining intake queue before exit");
    manager.shutdown_and_drain(Duration::from_millis(config.shutdown_grace_ms)).await;
    if !status_task.is_finished() {
        status_task.abort();
    }
    pidfile::remove(pidfile_path);
    Ok(outcome)
}

/// Sends SIGTERM to the aggregator named by the pidfile.
pub fn stop(pidfile_path: &Path) -> anyhow::Result<()> {
    send_signal(pidfile_path, "-TERM")
}

/// Sends SIGHUP to the aggregator named by the pidfile, triggering a
/// correlator rule reload without restarting producers.
pub fn reload_config(pidfile_path: &Path) -> anyhow::Result<()> {
    send_signal(pidfile_path, "-HUP")
}

fn send_signal(pidfile_path: &Path, flag: &str) -> anyhow::Result<()> {
    let pid = pidfile::read(pidfile_path)?;
    let status = std::process::Command::new("kill").arg(flag).arg(pid.to_string()).status()?;
    if !status.success() {
        anyhow::bail!("kill {flag} {pid} exited with {status}");
    }
    Ok(())
}

/// Prints the last status snapshot written by a running aggregator.
pub fn status_cmd(status_path: &Path) -> anyhow::Result<()> {
    let report = status::read(status_path)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn build_sinks(
    config: &Config,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) -> anyhow::Result<Vec<Sink>> {
    let mut sinks = Vec::new();

    if config.sinks.console.enabled {
        sinks.push(Sink::Console(ConsoleSink));
    }

    if config.sinks.file.enabled {
        let file_sink = FileSink::spawn(
            PathBuf::from(&config.sinks.file.path),
            config.sinks.file.flush_every_n,
            config.sinks.file.flush_interval_ms,
            config.sinks.file.rotate_max_bytes,
            shutdown.clone(),
        );
        sinks.push(Sink::File(file_sink));
    }

    if config.sinks.publisher.enabled {
        let addr: SocketAddr = config.sinks.publisher.endpoint.parse()?;
        let publisher = Arc::new(Publisher::new(1024, stats.clone()));
        let serving = publisher.clone();
        tokio::spawn(async move {
            if let Err(err) = serving.serve(addr).await {
                error!(error = %err, "downstream publisher stopped serving");
            }
        });
        sinks.push(Sink::Publisher(PublisherSink::new(publisher)));
    }

    Ok(sinks)
}

fn spawn_receivers(manager: &Arc<AlertManager>, config: &Config) -> anyhow::Result<()> {
    let nids_signature: SocketAddr = config.producers.nids_signature.endpoint.parse()?;
    let nids_anomaly: SocketAddr = config.producers.nids_anomaly.endpoint.parse()?;
    let hids: SocketAddr = config.producers.hids.endpoint.parse()?;

    manager.spawn_receiver("nids_signature", nids_signature);
    manager.spawn_receiver("nids_anomaly", nids_anomaly);
    manager.spawn_receiver("hids", hids);
    Ok(())
}

fn spawn_producers(
    config: &Config,
    manager: Arc<AlertManager>,
    shutdown: CancellationToken,
) -> HashMap<String, Arc<ProducerHealth>> {
    let specs = [
        ("nids-signature", "nids_signature", &config.producers.nids_signature.endpoint),
        ("nids-anomaly", "nids_anomaly", &config.producers.nids_anomaly.endpoint),
        ("hids", "hids", &config.producers.hids.endpoint),
    ];

    let mut health_by_label = HashMap::new();
    for (label, heartbeat_source, endpoint) in specs {
        let spec = ProducerSpec {
            label,
            binary: supervisor::producer_binary_path(&format!("producer-{label}")),
            bind_addr: endpoint.clone(),
            heartbeat_source,
        };
        let (_handle, health) = supervisor::spawn(
            spec,
            config.supervisor.restart_backoff_max_ms,
            config.supervisor.heartbeat_interval_ms,
            manager.clone(),
            shutdown.clone(),
        );
        health_by_label.insert(label.to_string(), health);
    }
    health_by_label
}

async fn status_writer_loop(
    manager: Arc<AlertManager>,
    producer_health: HashMap<String, Arc<ProducerHealth>>,
    shutdown: CancellationToken,
    path: PathBuf,
    started_at: chrono::DateTime<Utc>,
    heartbeat_interval_ms: u64,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let stats = manager.stats();
                info!(received = stats.received, published = stats.published, malformed = stats.malformed, "heartbeat");

                let producers = producer_health.iter().map(|(label, health)| (label.clone(), health.snapshot())).collect();
                let report = StatusReport {
                    pid: std::process::id(),
                    started_at,
                    updated_at: Utc::now(),
                    stats,
                    producers,
                };
                if let Err(err) = status::write(&path, &report) {
                    warn!(error = %err, "failed to write status file");
                }
            }
        }
    }
}

/// Blocks until SIGINT or SIGTERM arrives, tripping `shutdown`.
/// SIGHUP re-reads the config file and hot-reloads the correlator's
/// rule set in place, without disturbing anything else.
async fn signal_loop(manager: Arc<AlertManager>, config_path: Option<PathBuf>, shutdown: CancellationToken) -> ShutdownCause {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    let cause = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break ShutdownCause::Interrupted;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break ShutdownCause::Terminated;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading correlator rules");
                match ids_config::load(config_path.as_deref()) {
                    Ok(config) => manager.reload_rules(config.correlator.rules),
                    Err(err) => error!(error = %err, "failed to reload config, keeping existing rules"),
                }
            }
        }
    };

    shutdown.cancel();
    cause
}
