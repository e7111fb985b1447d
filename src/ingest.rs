// Controller-side ingestion: turns one inbound report frame into a store call plus an Ack,
// and tracks which node each live stream belongs to so acks can be pushed downstream.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{Ack, Report};
use crate::storage::Store;

/// Counters shared by every report stream.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub active_streams: AtomicUsize,
    pub reports_ingested: AtomicU64,
    pub reports_rejected: AtomicU64,
}

pub struct IngestOutcome {
    /// Node the frame belonged to, if it parsed as a report.
    pub node_id: Option<String>,
    pub ack: Ack,
}

/// Parses one text frame and ingests it. Failures become a negative Ack; they never end the stream.
pub async fn ingest_frame(store: &dyn Store, text: &str, stats: &IngestStats) -> IngestOutcome {
    let report: Report = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            stats.reports_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, operation = "decode_report", "malformed report frame");
            return IngestOutcome {
                node_id: None,
                ack: Ack::failure(format!("malformed report: {}", e)),
            };
        }
    };

    debug!(
        node_id = %report.node_id,
        cpu_load1 = report.cpu.load1,
        mem_used_percent = report.mem.used_percent,
        net_burst = report.net.microburst_events,
        pings = report.ping_results.len(),
        "report received"
    );

    let ack = match store.ingest(&report).await {
        Ok(()) => {
            stats.reports_ingested.fetch_add(1, Ordering::Relaxed);
            Ack::ok()
        }
        Err(e) => {
            stats.reports_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, node_id = %report.node_id, operation = "ingest", "ingest failed");
            Ack::failure(format!("ingest failed: {}", e))
        }
    };
    IngestOutcome {
        node_id: Some(report.node_id),
        ack,
    }
}

/// Node id -> downlink of that node's current stream. A newer stream for the same node
/// replaces the older registration; the older stream's unregister is then a no-op.
#[derive(Default)]
pub struct DownlinkRegistry {
    streams: Mutex<HashMap<String, (u64, mpsc::Sender<Ack>)>>,
    next_id: AtomicU64,
}

impl DownlinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registration id to pass to `unregister`.
    pub fn register(&self, node_id: &str, tx: mpsc::Sender<Ack>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(node_id.to_string(), (id, tx));
        }
        id
    }

    pub fn unregister(&self, node_id: &str, id: u64) {
        if let Ok(mut streams) = self.streams.lock()
            && streams.get(node_id).is_some_and(|(current, _)| *current == id)
        {
            streams.remove(node_id);
        }
    }

    pub fn is_connected(&self, node_id: &str) -> bool {
        self.streams
            .lock()
            .map(|s| s.contains_key(node_id))
            .unwrap_or(false)
    }

    /// Queues an Ack for the node's stream. False if the node has no live stream or its queue is full.
    pub fn send(&self, node_id: &str, ack: Ack) -> bool {
        let tx = match self.streams.lock() {
            Ok(streams) => streams.get(node_id).map(|(_, tx)| tx.clone()),
            Err(_) => None,
        };
        match tx {
            Some(tx) => tx.try_send(ack).is_ok(),
            None => false,
        }
    }
}

/// Logs stream/ingest counters, plus the store's durable-write losses when it has any
/// asynchronous write path, every `interval` until `shutdown_rx` fires.
pub fn spawn_stats_logger(
    stats: std::sync::Arc<IngestStats>,
    store: std::sync::Arc<dyn Store>,
    interval: std::time::Duration,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let durable = store.durable_stats().unwrap_or_default();
                    tracing::info!(
                        active_streams = stats.active_streams.load(Ordering::Relaxed),
                        reports_ingested = stats.reports_ingested.load(Ordering::Relaxed),
                        reports_rejected = stats.reports_rejected.load(Ordering::Relaxed),
                        forward_dropped = durable.forward_dropped,
                        durable_failures = durable.durable_failures,
                        "controller stats"
                    );
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}
