use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use ids_telemetry::PipelineStatsSnapshot;
use serde::{Deserialize, Serialize};

/// One producer's supervision state, as seen by [`crate::supervisor`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub running: bool,
    pub restart_count: u32,
}

/// Snapshot written to the status file on every heartbeat tick and read
/// back by the `status` subcommand.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stats: PipelineStatsSnapshot,
    pub producers: HashMap<String, ProducerStatus>,
}

pub fn write(path: &Path, report: &StatusReport) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json)
}

pub fn read(path: &Path) -> std::io::Result<StatusReport> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
