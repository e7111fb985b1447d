// Cache-first store: reads and liveness come from the in-memory cache, and every ingested
// report is forwarded through a bounded channel to a writer task that persists it durably.
// A full queue or a durable failure is logged and never fails the cache path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{DurableStats, MemoryStore, SqliteStore, Store};
use crate::models::{MetricSnapshot, NodeStatus, Report};

pub struct TieredStore {
    cache: MemoryStore,
    durable: Arc<SqliteStore>,
    forward_tx: mpsc::Sender<(Report, i64)>,
    writer: std::sync::Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
    forward_dropped: Arc<AtomicU64>,
    durable_failures: Arc<AtomicU64>,
}

impl TieredStore {
    pub fn new(cache: MemoryStore, durable: Arc<SqliteStore>, queue_capacity: usize) -> Self {
        let (forward_tx, forward_rx) = mpsc::channel(queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let durable_failures = Arc::new(AtomicU64::new(0));
        let writer = spawn_durable_writer(
            forward_rx,
            shutdown_rx,
            durable.clone(),
            durable_failures.clone(),
        );
        Self {
            cache,
            durable,
            forward_tx,
            writer: std::sync::Mutex::new(Some((shutdown_tx, writer))),
            forward_dropped: Arc::new(AtomicU64::new(0)),
            durable_failures,
        }
    }

    /// Reports that never reached the durable store because the queue was full.
    pub fn forward_dropped(&self) -> u64 {
        self.forward_dropped.load(Ordering::Relaxed)
    }

    /// Durable writes that returned an error.
    pub fn durable_failures(&self) -> u64 {
        self.durable_failures.load(Ordering::Relaxed)
    }

    /// Persists already-queued writes, then closes the durable store.
    /// Reports ingested after this call stay in the cache only.
    pub async fn close(&self) {
        let writer = self.writer.lock().ok().and_then(|mut g| g.take());
        if let Some((shutdown_tx, handle)) = writer {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
        self.durable.close().await;
    }
}

/// Persists forwarded reports in arrival order. On shutdown the queue is closed and drained.
fn spawn_durable_writer(
    mut forward_rx: mpsc::Receiver<(Report, i64)>,
    mut shutdown_rx: oneshot::Receiver<()>,
    durable: Arc<SqliteStore>,
    failures: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = forward_rx.recv() => {
                    match item {
                        Some((report, seen_at)) => persist(&durable, &failures, &report, seen_at).await,
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    forward_rx.close();
                    while let Some((report, seen_at)) = forward_rx.recv().await {
                        persist(&durable, &failures, &report, seen_at).await;
                    }
                    break;
                }
            }
        }
        debug!("durable writer shutting down");
    })
}

async fn persist(durable: &SqliteStore, failures: &AtomicU64, report: &Report, seen_at: i64) {
    if let Err(e) = durable.ingest_at(report, seen_at).await {
        failures.fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, node_id = %report.node_id, "durable write failed");
    }
}

#[async_trait]
impl Store for TieredStore {
    #[instrument(skip(self, report), fields(repo = "tiered", operation = "ingest", node_id = %report.node_id))]
    async fn ingest_at(&self, report: &Report, seen_at: i64) -> anyhow::Result<()> {
        self.cache.ingest_at(report, seen_at).await?;
        if let Err(e) = self.forward_tx.try_send((report.clone(), seen_at)) {
            self.forward_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "durable forward queue unavailable; report kept in cache only");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "tiered", operation = "list_nodes"))]
    async fn list_nodes_at(&self, now: i64) -> anyhow::Result<Vec<NodeStatus>> {
        self.cache.list_nodes_at(now).await
    }

    #[instrument(skip(self), fields(repo = "tiered", operation = "history"))]
    async fn history(&self, node_id: &str, limit: usize) -> anyhow::Result<Vec<MetricSnapshot>> {
        let cached = self.cache.history(node_id, limit).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        self.durable.history(node_id, limit).await
    }

    fn durable_stats(&self) -> Option<DurableStats> {
        Some(DurableStats {
            forward_dropped: self.forward_dropped(),
            durable_failures: self.durable_failures(),
        })
    }
}
