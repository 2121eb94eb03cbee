use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ids-aggregator", about = "Integration controller for the hybrid intrusion-detection aggregator")]
pub struct Cli {
    /// Path to the TOML config file. Built-in defaults apply when omitted.
    #[arg(long, env = "IDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Where the running process's PID is recorded, used by `stop` and
    /// `reload-config` to find it.
    #[arg(long, env = "IDS_PIDFILE", default_value = "ids-aggregator.pid", global = true)]
    pub pidfile: PathBuf,

    /// Where `status` reads the last-written snapshot from.
    #[arg(long, env = "IDS_STATUS_FILE", default_value = "ids-aggregator-status.json", global = true)]
    pub status_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Starts the aggregator and its supervised producers in the foreground.
    Start,
    /// Sends SIGTERM to the running aggregator, found via the pidfile.
    Stop,
    /// Prints the last status snapshot written by a running aggregator.
    Status,
    /// Sends SIGHUP to the running aggregator to reload correlator rules.
    ReloadConfig,
}
