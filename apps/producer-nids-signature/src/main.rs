use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use ids_messaging::RawPublisher;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Synthetic signature-matching producer. Stands in for a real NIDS
/// engine: it emits raw, unnormalized alerts at a fixed cadence so the
/// aggregator has something to dedup, correlate, and sink.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "IDS_BIND", default_value = "127.0.0.1:5556")]
    bind: SocketAddr,

    #[arg(long, env = "IDS_TICK_MS", default_value_t = 4_000)]
    tick_ms: u64,
}

const SRC_IPS: &[&str] = &["10.0.0.5", "10.0.0.9", "10.0.0.42", "203.0.113.7"];

/// Listed in escalation order so a rolling window of producer output
/// periodically strings a scan and an exploit together from the same
/// source, giving the aggregator's correlator something to fire on.
const TITLES: &[&str] = &["Port Scan", "SQL Injection", "Brute Force Login", "Suspicious DNS Query"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    ids_telemetry::init_tracing("producer_nids_signature");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let publisher = Arc::new(RawPublisher::new(256));

    let serving = publisher.clone();
    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = serving.serve(args.bind, serve_shutdown).await {
            error!(error = %err, "raw publisher stopped serving");
        }
    });

    let generating = publisher.clone();
    let generator_shutdown = shutdown.clone();
    let generator = tokio::spawn(generate_loop(generating, args.tick_ms, generator_shutdown));

    wait_for_shutdown_signal().await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = generator.await;
        let _ = server.await;
    })
    .await;

    Ok(())
}

async fn generate_loop(publisher: Arc<RawPublisher>, tick_ms: u64, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
    let mut rng = rand::thread_rng();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let envelope = next_envelope(&mut rng);
                match serde_json::to_vec(&envelope) {
                    Ok(bytes) => { let _ = publisher.publish_raw(Bytes::from(bytes)); }
                    Err(err) => error!(error = %err, "failed to encode synthetic alert"),
                }
            }
        }
    }
}

fn next_envelope(rng: &mut impl Rng) -> serde_json::Value {
    let title = TITLES.choose(rng).unwrap();
    let src_ip = SRC_IPS.choose(rng).unwrap();
    serde_json::json!({
        "source": "nids_signature",
        "title": title,
        "metadata": { "src_ip": src_ip },
    })
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
