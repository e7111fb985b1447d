// Controller-side projection of reports: per-node liveness and metric history.

use serde::{Deserialize, Serialize};

/// Persisted projection of one Report. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub timestamp: i64,
    pub cpu_load1: f64,
    pub mem_used_percent: f64,
    pub net_burst: u64,
    pub ping_avg_rtt: f64,
}

/// `online` is derived at read time from `last_seen`; history is oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: String,
    pub last_seen: i64,
    pub online: bool,
    pub history: Vec<MetricSnapshot>,
}
