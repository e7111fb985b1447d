// Bounded in-memory liveness cache. One RwLock per instance guards every node record;
// history is a FIFO capped at `cap` entries.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::instrument;

use super::{RttSource, Store, is_online, snapshot_from_report};
use crate::models::{MetricSnapshot, NodeStatus, Report};

struct NodeRecord {
    last_seen: i64,
    history: VecDeque<MetricSnapshot>,
}

pub struct MemoryStore {
    nodes: RwLock<HashMap<String, NodeRecord>>,
    cap: usize,
    rtt_source: RttSource,
}

impl MemoryStore {
    pub fn new(cap: usize, rtt_source: RttSource) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            cap: cap.max(1),
            rtt_source,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    #[instrument(skip(self, report), fields(repo = "memory", operation = "ingest", node_id = %report.node_id))]
    async fn ingest_at(&self, report: &Report, seen_at: i64) -> anyhow::Result<()> {
        let snapshot = snapshot_from_report(report, self.rtt_source);
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| anyhow::anyhow!("memory store lock poisoned: {}", e))?;
        let record = nodes
            .entry(report.node_id.clone())
            .or_insert_with(|| NodeRecord {
                last_seen: seen_at,
                history: VecDeque::with_capacity(self.cap),
            });
        record.last_seen = seen_at;
        if record.history.len() == self.cap {
            record.history.pop_front();
        }
        record.history.push_back(snapshot);
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "memory", operation = "list_nodes"))]
    async fn list_nodes_at(&self, now: i64) -> anyhow::Result<Vec<NodeStatus>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|e| anyhow::anyhow!("memory store lock poisoned: {}", e))?;
        let mut out: Vec<NodeStatus> = nodes
            .iter()
            .map(|(node_id, record)| NodeStatus {
                node_id: node_id.clone(),
                last_seen: record.last_seen,
                online: is_online(record.last_seen, now),
                history: record.history.iter().cloned().collect(),
            })
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "memory", operation = "history"))]
    async fn history(&self, node_id: &str, limit: usize) -> anyhow::Result<Vec<MetricSnapshot>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|e| anyhow::anyhow!("memory store lock poisoned: {}", e))?;
        let Some(record) = nodes.get(node_id) else {
            return Ok(vec![]);
        };
        let skip = record.history.len().saturating_sub(limit);
        Ok(record.history.iter().skip(skip).cloned().collect())
    }
}
