use serde::Deserialize;

use crate::models::Target;
use crate::storage::RttSource;

// ---- Controller ----

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Which `Store` implementation the controller composes at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
    /// In-memory cache for reads, SQLite written asynchronously.
    Tiered,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Age in days after which metric rows are swept. `<= 0` disables the sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// In-memory history cap per node (also the history attached to `listNodes`).
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default)]
    pub rtt_source: RttSource,
    /// Pending durable writes held for the tiered backend before new ones are dropped.
    #[serde(default = "default_forward_queue")]
    pub forward_queue: usize,
}

fn default_db_path() -> String {
    "data/fleetwatch.db".into()
}

fn default_retention_days() -> i64 {
    30
}

fn default_history_cap() -> usize {
    300
}

fn default_forward_queue() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (active streams, reports ingested) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

impl ControllerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "controller.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: ControllerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.storage.backend == StorageBackend::Memory || !self.storage.path.is_empty(),
            "storage.path must be non-empty for the {:?} backend",
            self.storage.backend
        );
        anyhow::ensure!(
            self.storage.history_cap > 0,
            "storage.history_cap must be > 0, got {}",
            self.storage.history_cap
        );
        anyhow::ensure!(
            self.storage.forward_queue > 0,
            "storage.forward_queue must be > 0, got {}",
            self.storage.forward_queue
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}

// ---- Agent ----

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub prober: ProberConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub node_id: String,
    /// WebSocket URL of the controller's report stream, e.g. `ws://10.0.0.1:8080/ws/report`.
    pub controller_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_report_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProberConfig {
    #[serde(default = "default_attempt_count")]
    pub attempt_count: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_targets")]
    pub targets: Vec<Target>,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            attempt_count: default_attempt_count(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            interval_ms: default_report_interval_ms(),
            targets: default_targets(),
        }
    }
}

fn default_attempt_count() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    1000
}

fn default_targets() -> Vec<Target> {
    vec![
        Target::tcp("8.8.8.8", 53),
        Target::tcp("1.1.1.1", 80),
        Target::tcp("223.5.5.5", 443),
    ]
}

impl AgentConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "agent.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.agent.node_id.is_empty(),
            "agent.node_id must be non-empty"
        );
        anyhow::ensure!(
            self.agent.controller_url.starts_with("ws://")
                || self.agent.controller_url.starts_with("wss://"),
            "agent.controller_url must be a ws:// or wss:// URL, got {}",
            self.agent.controller_url
        );
        anyhow::ensure!(
            self.agent.connect_timeout_ms > 0,
            "agent.connect_timeout_ms must be > 0, got {}",
            self.agent.connect_timeout_ms
        );
        anyhow::ensure!(
            self.agent.sample_interval_ms > 0,
            "agent.sample_interval_ms must be > 0, got {}",
            self.agent.sample_interval_ms
        );
        anyhow::ensure!(
            self.agent.report_interval_ms >= self.agent.sample_interval_ms,
            "agent.report_interval_ms must be >= sample_interval_ms, got {} < {}",
            self.agent.report_interval_ms,
            self.agent.sample_interval_ms
        );
        anyhow::ensure!(
            self.agent.stats_log_interval_secs > 0,
            "agent.stats_log_interval_secs must be > 0, got {}",
            self.agent.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.prober.attempt_count > 0,
            "prober.attempt_count must be > 0, got {}",
            self.prober.attempt_count
        );
        anyhow::ensure!(
            self.prober.attempt_timeout_ms > 0,
            "prober.attempt_timeout_ms must be > 0, got {}",
            self.prober.attempt_timeout_ms
        );
        anyhow::ensure!(
            self.prober.interval_ms > 0,
            "prober.interval_ms must be > 0, got {}",
            self.prober.interval_ms
        );
        Ok(())
    }
}
