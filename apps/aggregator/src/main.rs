use clap::Parser;
use ids_aggregator::cli::{Cli, Command};
use ids_aggregator::run;
use tracing::error;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load .env into the process environment, if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // 2. Commands other than `start` are one-shot and don't need a
    // tracing subscriber or a tokio runtime of their own.
    match &cli.command {
        Command::Stop => {
            run::stop(&cli.pidfile)?;
            return Ok(());
        }
        Command::Status => {
            run::status_cmd(&cli.status_file)?;
            return Ok(());
        }
        Command::ReloadConfig => {
            run::reload_config(&cli.pidfile)?;
            return Ok(());
        }
        Command::Start => {}
    }

    // 3. `start` runs in the foreground for the life of the process.
    ids_telemetry::init_tracing("ids_aggregator");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        match run::start(cli.config, &cli.pidfile, cli.status_file).await {
            Ok(run::StartOutcome::Clean) => {}
            Ok(run::StartOutcome::Interrupted) => std::process::exit(130),
            Err(err @ run::StartError::Config(_)) => {
                error!(error = %err, "configuration error");
                std::process::exit(1);
            }
            Err(err @ run::StartError::Startup(_)) => {
                error!(error = %err, "startup failure");
                std::process::exit(2);
            }
            Err(err @ run::StartError::Runtime(_)) => {
                error!(error = %err, "runtime failure");
                std::process::exit(3);
            }
        }
    });

    Ok(())
}
