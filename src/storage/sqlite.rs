// Durable SQLite backend (sqlx pool, WAL + synchronous=NORMAL).
// nodes: one liveness row per node. metrics: append-only log indexed by (node_id, timestamp)
// and by timestamp for the retention sweep. The sweep task is owned by the store.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::{RttSource, Store, is_online, snapshot_from_report};
use crate::models::{MetricSnapshot, NodeStatus, Report, now_ms};

/// Period of the background retention sweep.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(3600);

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

struct Sweeper {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    retention_days: i64,
    history_cap: usize,
    rtt_source: RttSource,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `path`, creates the schema and starts the
    /// hourly retention sweep unless `retention_days <= 0`.
    pub async fn open(
        path: &str,
        retention_days: i64,
        history_cap: usize,
        rtt_source: RttSource,
    ) -> anyhow::Result<Self> {
        Self::open_with_sweep_period(path, retention_days, history_cap, rtt_source, SWEEP_PERIOD)
            .await
    }

    /// Same as `open` with a custom sweep period; the first sweep runs one period after open.
    pub async fn open_with_sweep_period(
        path: &str,
        retention_days: i64,
        history_cap: usize,
        rtt_source: RttSource,
        sweep_period: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        let store = Self {
            pool,
            retention_days,
            history_cap: history_cap.max(1),
            rtt_source,
            sweeper: Mutex::new(None),
        };
        store.init().await?;

        if retention_days > 0 {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(run_sweeper(
                store.pool.clone(),
                retention_days,
                sweep_period,
                shutdown_rx,
            ));
            if let Ok(mut guard) = store.sweeper.lock() {
                *guard = Some(Sweeper {
                    shutdown_tx,
                    handle,
                });
            }
        } else {
            info!(retention_days, "retention sweep disabled");
        }
        Ok(store)
    }

    async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nodes (node_id TEXT PRIMARY KEY, last_seen INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                cpu_load1 REAL NOT NULL,
                mem_used_percent REAL NOT NULL,
                net_burst INTEGER NOT NULL,
                ping_avg_rtt REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_node_time ON metrics(node_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_time ON metrics(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Deletes metric rows older than the retention horizon relative to `now`.
    /// Returns 0 without touching the table when retention is disabled.
    pub async fn sweep_expired(&self, now: i64) -> anyhow::Result<u64> {
        if self.retention_days <= 0 {
            return Ok(0);
        }
        sweep_expired_rows(&self.pool, self.retention_days, now).await
    }

    /// True while the background sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|g| g.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stops the sweep task and closes the pool.
    pub async fn close(&self) {
        let sweeper = self.sweeper.lock().ok().and_then(|mut g| g.take());
        if let Some(Sweeper {
            shutdown_tx,
            handle,
        }) = sweeper
        {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
        self.pool.close().await;
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock()
            && let Some(sweeper) = guard.take()
        {
            sweeper.handle.abort();
        }
    }
}

/// Oldest timestamp kept. Saturates, so a huge horizon keeps everything instead of wrapping.
fn retention_cutoff(now: i64, retention_days: i64) -> i64 {
    now.saturating_sub(retention_days.saturating_mul(MS_PER_DAY))
}

#[instrument(skip(pool), fields(repo = "sqlite", operation = "sweep_expired"))]
async fn sweep_expired_rows(pool: &SqlitePool, retention_days: i64, now: i64) -> anyhow::Result<u64> {
    let cutoff = retention_cutoff(now, retention_days);
    let r = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(r.rows_affected())
}

async fn run_sweeper(
    pool: SqlitePool,
    retention_days: i64,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match sweep_expired_rows(&pool, retention_days, now_ms()).await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, retention_days, "swept expired metric rows"),
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("retention sweep shutting down");
                break;
            }
        }
    }
}

fn parse_snapshot_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<MetricSnapshot> {
    let net_burst: i64 = row.try_get("net_burst")?;
    Ok(MetricSnapshot {
        timestamp: row.try_get("timestamp")?,
        cpu_load1: row.try_get("cpu_load1")?,
        mem_used_percent: row.try_get("mem_used_percent")?,
        net_burst: net_burst.max(0) as u64,
        ping_avg_rtt: row.try_get("ping_avg_rtt")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, report), fields(repo = "sqlite", operation = "ingest", node_id = %report.node_id))]
    async fn ingest_at(&self, report: &Report, seen_at: i64) -> anyhow::Result<()> {
        let snapshot = snapshot_from_report(report, self.rtt_source);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO nodes (node_id, last_seen) VALUES (?, ?)
             ON CONFLICT(node_id) DO UPDATE SET last_seen = excluded.last_seen",
        )
        .bind(&report.node_id)
        .bind(seen_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO metrics (node_id, timestamp, cpu_load1, mem_used_percent, net_burst, ping_avg_rtt)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.node_id)
        .bind(snapshot.timestamp)
        .bind(snapshot.cpu_load1)
        .bind(snapshot.mem_used_percent)
        .bind(snapshot.net_burst.min(i64::MAX as u64) as i64)
        .bind(snapshot.ping_avg_rtt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "sqlite", operation = "list_nodes"))]
    async fn list_nodes_at(&self, now: i64) -> anyhow::Result<Vec<NodeStatus>> {
        let rows = sqlx::query("SELECT node_id, last_seen FROM nodes ORDER BY node_id")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let node_id: String = row.try_get("node_id")?;
            let last_seen: i64 = row.try_get("last_seen")?;
            let history = self.history(&node_id, self.history_cap).await?;
            out.push(NodeStatus {
                node_id,
                last_seen,
                online: is_online(last_seen, now),
                history,
            });
        }
        Ok(out)
    }

    /// Newest `limit` rows by a descending index scan, reversed to ascending order.
    #[instrument(skip(self), fields(repo = "sqlite", operation = "history"))]
    async fn history(&self, node_id: &str, limit: usize) -> anyhow::Result<Vec<MetricSnapshot>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let rows = sqlx::query(
            "SELECT timestamp, cpu_load1, mem_used_percent, net_burst, ping_avg_rtt
             FROM metrics WHERE node_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(node_id)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(parse_snapshot_row(row)?);
        }
        out.reverse();
        Ok(out)
    }
}
