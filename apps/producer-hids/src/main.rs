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

/// Synthetic host-based IDS producer. Stands in for file-integrity,
/// process, and log monitors combined: picks one of the three HIDS
/// sub-sources per tick so the aggregator sees a realistic mix.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "IDS_BIND", default_value = "127.0.0.1:5558")]
    bind: SocketAddr,

    #[arg(long, env = "IDS_TICK_MS", default_value_t = 6_000)]
    tick_ms: u64,
}

const HOSTNAMES: &[&str] = &["web-01", "web-02", "db-01", "bastion-01"];

struct SubSource {
    source: &'static str,
    titles: &'static [&'static str],
}

const SUB_SOURCES: &[SubSource] = &[
    SubSource { source: "hids_file", titles: &["Unexpected File Modification", "Unauthorized Config Change"] },
    SubSource { source: "hids_process", titles: &["Unknown Process Spawned", "Privilege Escalation Attempt"] },
    SubSource { source: "hids_log", titles: &["Log Tampering Detected", "Authentication Log Cleared"] },
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    ids_telemetry::init_tracing("producer_hids");

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
    let sub_source = SUB_SOURCES.choose(rng).unwrap();
    let title = sub_source.titles.choose(rng).unwrap();
    let hostname = HOSTNAMES.choose(rng).unwrap();
    serde_json::json!({
        "source": sub_source.source,
        "title": title,
        "metadata": { "hostname": hostname },
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
