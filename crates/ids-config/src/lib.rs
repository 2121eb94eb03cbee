//! Configuration for the aggregator binary: a `Config` tree deserialized
//! from TOML, overlaid with a handful of environment overrides, and
//! validated before anything else in the process starts.

mod error;

pub use error::ConfigError;

use std::path::Path;

use ids_core::correlation::CorrelationRule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub producers: ProducersConfig,
    pub manager: ManagerConfig,
    pub sinks: SinksConfig,
    pub correlator: CorrelatorConfig,
    pub supervisor: SupervisorConfig,
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            producers: ProducersConfig::default(),
            manager: ManagerConfig::default(),
            sinks: SinksConfig::default(),
            correlator: CorrelatorConfig::default(),
            supervisor: SupervisorConfig::default(),
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerEndpoint {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducersConfig {
    pub nids_signature: ProducerEndpoint,
    pub nids_anomaly: ProducerEndpoint,
    pub hids: ProducerEndpoint,
}

impl Default for ProducersConfig {
    fn default() -> Self {
        ProducersConfig {
            nids_signature: ProducerEndpoint { endpoint: "127.0.0.1:5556".into() },
            nids_anomaly: ProducerEndpoint { endpoint: "127.0.0.1:5557".into() },
            hids: ProducerEndpoint { endpoint: "127.0.0.1:5558".into() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub intake_capacity: usize,
    pub worker_count: usize,
    pub dedup_window_ms: u64,
    pub dedup_max_entries: usize,
    /// How often the periodic eviction sweep runs, on top of the
    /// bounded eviction done on every insert.
    pub dedup_evict_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            intake_capacity: 10_000,
            worker_count: 4,
            dedup_window_ms: 60_000,
            dedup_max_entries: 100_000,
            dedup_evict_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSinkConfig {
    pub enabled: bool,
}

impl Default for ConsoleSinkConfig {
    fn default() -> Self {
        ConsoleSinkConfig { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    pub enabled: bool,
    pub path: String,
    pub flush_every_n: u64,
    pub flush_interval_ms: u64,
    /// Rotation hook: renames the current file to
    /// `<stem>-YYYYMMDD-HHMMSS.<ext>` once it crosses this size. `None`
    /// disables size-based rotation.
    pub rotate_max_bytes: Option<u64>,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        FileSinkConfig {
            enabled: false,
            path: "unified_alerts.jsonl".into(),
            flush_every_n: 100,
            flush_interval_ms: 1_000,
            rotate_max_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSinkConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for PublisherSinkConfig {
    fn default() -> Self {
        PublisherSinkConfig { enabled: false, endpoint: "0.0.0.0:5559".into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub console: ConsoleSinkConfig,
    pub file: FileSinkConfig,
    pub publisher: PublisherSinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub enabled: bool,
    /// `None` derives the window from `max(rule.time_window_ms)` plus a
    /// safety margin at load time.
    pub max_history_window_ms: Option<u64>,
    pub cooldown_policy: String,
    pub rules: Vec<CorrelationRule>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            enabled: true,
            max_history_window_ms: None,
            cooldown_policy: "per_rule_window".into(),
            rules: Vec::new(),
        }
    }
}

impl CorrelatorConfig {
    /// Resolves `max_history_window_ms`, computing it from the rule set
    /// with a 10% safety margin when not set explicitly.
    pub fn effective_max_history_window_ms(&self) -> u64 {
        match self.max_history_window_ms {
            Some(ms) => ms,
            None => {
                let widest = self.rules.iter().map(|r| r.time_window_ms).max().unwrap_or(600_000);
                widest + widest / 10
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub heartbeat_interval_ms: u64,
    pub restart_backoff_max_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig { heartbeat_interval_ms: 30_000, restart_backoff_max_ms: 60_000 }
    }
}

/// Loads configuration from `path` (or the built-in defaults when
/// `path` is `None`), applies environment overrides, then validates.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Overlays a small set of `IDS_<SECTION>__<KEY>` environment variables
/// on top of the file-loaded config, matching the aggregator's runtime
/// operational knobs rather than every field in the tree.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("IDS_MANAGER__WORKER_COUNT") {
        if let Ok(n) = v.parse() {
            config.manager.worker_count = n;
        }
    }
    if let Ok(v) = std::env::var("IDS_MANAGER__INTAKE_CAPACITY") {
        if let Ok(n) = v.parse() {
            config.manager.intake_capacity = n;
        }
    }
    if let Ok(v) = std::env::var("IDS_SINKS__FILE__PATH") {
        config.sinks.file.path = v;
    }
    if let Ok(v) = std::env::var("IDS_SHUTDOWN_GRACE_MS") {
        if let Ok(n) = v.parse() {
            config.shutdown_grace_ms = n;
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.manager.worker_count == 0 {
        return Err(ConfigError::Invalid("manager.worker_count must be > 0".into()));
    }
    if config.manager.intake_capacity == 0 {
        return Err(ConfigError::Invalid("manager.intake_capacity must be > 0".into()));
    }
    if config.manager.dedup_max_entries == 0 {
        return Err(ConfigError::Invalid("manager.dedup_max_entries must be > 0".into()));
    }
    if !config.sinks.console.enabled && !config.sinks.file.enabled && !config.sinks.publisher.enabled {
        return Err(ConfigError::Invalid("at least one sink must be enabled".into()));
    }

    let max_history = config.correlator.effective_max_history_window_ms();
    for rule in &config.correlator.rules {
        if rule.time_window_ms == 0 {
            return Err(ConfigError::Invalid(format!("rule `{}`: time_window_ms must be > 0", rule.rule_id)));
        }
        if rule.time_window_ms > max_history {
            return Err(ConfigError::Invalid(format!(
                "rule `{}`: time_window_ms {} exceeds max_history_window_ms {}",
                rule.rule_id, rule.time_window_ms, max_history
            )));
        }
        if rule.effective_min_distinct() > rule.required_events.len() {
            return Err(ConfigError::Invalid(format!(
                "rule `{}`: min_distinct_events exceeds required_events length",
                rule.rule_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate_cleanly() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.manager.worker_count = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn loads_minimal_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[manager]\nworker_count = 8\n").unwrap();
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.manager.worker_count, 8);
        assert_eq!(config.manager.intake_capacity, 10_000);
    }

    #[test]
    fn rule_window_wider_than_max_history_is_rejected() {
        let mut config = Config::default();
        config.correlator.max_history_window_ms = Some(1_000);
        config.correlator.rules.push(CorrelationRule {
            rule_id: "r1".into(),
            name: "n".into(),
            description: String::new(),
            severity: ids_core::Severity::High,
            time_window_ms: 2_000,
            required_events: vec![],
            same_actor: false,
            min_distinct_events: None,
            cooldown_ms: None,
        });
        assert!(validate(&config).is_err());
    }
}
