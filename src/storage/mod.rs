// Storage contract shared by the ingestion endpoint and the dashboard API.
// Backends: bounded in-memory cache, durable SQLite, and a tiered combination of both.

mod memory;
mod sqlite;
mod tiered;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use tiered::TieredStore;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::models::{MetricSnapshot, NodeStatus, Report, now_ms};

/// A node is online iff a report was ingested less than this long ago.
pub const LIVENESS_WINDOW_MS: i64 = 15_000;

pub fn is_online(last_seen: i64, now: i64) -> bool {
    now - last_seen < LIVENESS_WINDOW_MS
}

/// Which ping results feed `MetricSnapshot::ping_avg_rtt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RttSource {
    /// Average RTT of the first probe target.
    #[default]
    First,
    /// Mean of the average RTTs of every target that answered at least once.
    Mean,
}

impl RttSource {
    pub fn ping_avg_rtt(self, report: &Report) -> f64 {
        match self {
            RttSource::First => report
                .ping_results
                .first()
                .map(|p| p.avg_rtt_ms)
                .unwrap_or(0.0),
            RttSource::Mean => {
                let reachable: Vec<f64> = report
                    .ping_results
                    .iter()
                    .filter(|p| p.packet_loss < 1.0)
                    .map(|p| p.avg_rtt_ms)
                    .collect();
                if reachable.is_empty() {
                    0.0
                } else {
                    reachable.iter().sum::<f64>() / reachable.len() as f64
                }
            }
        }
    }
}

/// Projects a report onto the persisted snapshot columns.
pub fn snapshot_from_report(report: &Report, rtt_source: RttSource) -> MetricSnapshot {
    MetricSnapshot {
        timestamp: report.timestamp,
        cpu_load1: report.cpu.load1,
        mem_used_percent: report.mem.used_percent,
        net_burst: report.net.microburst_events,
        ping_avg_rtt: rtt_source.ping_avg_rtt(report),
    }
}

/// Loss counters of an asynchronous durable write path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurableStats {
    /// Reports not queued for durable storage because the queue was full.
    pub forward_dropped: u64,
    /// Durable writes that returned an error.
    pub durable_failures: u64,
}

/// Uniform ingestion/query contract. Implementations must be safe to call from many streams at once.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upserts node liveness (last seen = `seen_at`) and appends one snapshot.
    async fn ingest_at(&self, report: &Report, seen_at: i64) -> anyhow::Result<()>;

    /// Every known node with `online` derived against `now`.
    async fn list_nodes_at(&self, now: i64) -> anyhow::Result<Vec<NodeStatus>>;

    /// Up to `limit` most recent snapshots, oldest first. Unknown node yields an empty list.
    async fn history(&self, node_id: &str, limit: usize) -> anyhow::Result<Vec<MetricSnapshot>>;

    async fn ingest(&self, report: &Report) -> anyhow::Result<()> {
        self.ingest_at(report, now_ms()).await
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeStatus>> {
        self.list_nodes_at(now_ms()).await
    }

    /// `None` for backends that write synchronously.
    fn durable_stats(&self) -> Option<DurableStats> {
        None
    }
}

/// The configured backend, kept concrete so it can be closed on shutdown.
pub enum Backend {
    Memory(Arc<MemoryStore>),
    Sqlite(Arc<SqliteStore>),
    Tiered(Arc<TieredStore>),
}

impl Backend {
    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let backend = match config.backend {
            StorageBackend::Memory => Backend::Memory(Arc::new(MemoryStore::new(
                config.history_cap,
                config.rtt_source,
            ))),
            StorageBackend::Sqlite => Backend::Sqlite(Arc::new(
                SqliteStore::open(
                    &config.path,
                    config.retention_days,
                    config.history_cap,
                    config.rtt_source,
                )
                .await?,
            )),
            StorageBackend::Tiered => {
                let durable = SqliteStore::open(
                    &config.path,
                    config.retention_days,
                    config.history_cap,
                    config.rtt_source,
                )
                .await?;
                Backend::Tiered(Arc::new(TieredStore::new(
                    MemoryStore::new(config.history_cap, config.rtt_source),
                    Arc::new(durable),
                    config.forward_queue,
                )))
            }
        };
        tracing::info!(backend = ?config.backend, path = %config.path, "storage opened");
        Ok(backend)
    }

    pub fn store(&self) -> Arc<dyn Store> {
        match self {
            Backend::Memory(s) => s.clone() as Arc<dyn Store>,
            Backend::Sqlite(s) => s.clone() as Arc<dyn Store>,
            Backend::Tiered(s) => s.clone() as Arc<dyn Store>,
        }
    }

    /// Flushes pending durable writes and stops background tasks.
    pub async fn close(&self) {
        match self {
            Backend::Memory(_) => {}
            Backend::Sqlite(s) => s.close().await,
            Backend::Tiered(s) => s.close().await,
        }
    }
}
