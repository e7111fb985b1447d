// Storage backends: memory, SQLite, tiered

mod common;

use common::{ping, report};
use fleetwatch::models::{Report, now_ms};
use fleetwatch::storage::{
    DurableStats, LIVENESS_WINDOW_MS, MemoryStore, RttSource, SqliteStore, Store, TieredStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;
const DAY_MS: i64 = 86_400_000;

async fn open_sqlite(dir: &TempDir, retention_days: i64) -> SqliteStore {
    let path = dir.path().join("fleetwatch.db");
    SqliteStore::open(path.to_str().unwrap(), retention_days, 300, RttSource::First)
        .await
        .unwrap()
}

fn n1_report() -> Report {
    let mut r = report("n1", T0, 0.5);
    r.mem.used_percent = 42.0;
    r.ping_results = vec![ping("8.8.8.8", 12.3, 0.0)];
    r
}

/// Ingest, read back, then let the liveness window lapse.
async fn assert_end_to_end(store: &dyn Store) {
    store.ingest_at(&n1_report(), T0).await.unwrap();

    let nodes = store.list_nodes_at(T0).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "n1");
    assert!(nodes[0].online);

    let history = store.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp, T0);
    assert_eq!(history[0].cpu_load1, 0.5);
    assert_eq!(history[0].mem_used_percent, 42.0);
    assert_eq!(history[0].ping_avg_rtt, 12.3);

    let nodes = store.list_nodes_at(T0 + 16_000).await.unwrap();
    assert!(!nodes[0].online);
}

async fn assert_liveness_boundary(store: &dyn Store) {
    store.ingest_at(&report("edge", T0, 0.1), T0).await.unwrap();
    let just_before = store.list_nodes_at(T0 + LIVENESS_WINDOW_MS - 1).await.unwrap();
    assert!(just_before[0].online);
    let at_window = store.list_nodes_at(T0 + LIVENESS_WINDOW_MS).await.unwrap();
    assert!(!at_window[0].online);
}

async fn assert_concurrent_nodes(store: Arc<dyn Store>) {
    let handles: Vec<_> = (0..32)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let r = report(&format!("node-{:02}", i), T0 + i, i as f64);
                store.ingest_at(&r, T0).await
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let nodes = store.list_nodes_at(T0).await.unwrap();
    assert_eq!(nodes.len(), 32);
    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(node.node_id, format!("node-{:02}", i));
        assert_eq!(node.history.len(), 1);
        assert_eq!(node.history[0].cpu_load1, i as f64);
    }
}

// --- memory ---

#[tokio::test]
async fn test_memory_end_to_end() {
    assert_end_to_end(&MemoryStore::new(300, RttSource::First)).await;
}

#[tokio::test]
async fn test_memory_liveness_boundary() {
    assert_liveness_boundary(&MemoryStore::new(300, RttSource::First)).await;
}

#[tokio::test]
async fn test_memory_history_is_capped_fifo() {
    let store = MemoryStore::new(5, RttSource::First);
    for i in 0..12 {
        store.ingest_at(&report("n1", T0 + i, i as f64), T0 + i).await.unwrap();
    }
    let history = store.history("n1", 100).await.unwrap();
    let timestamps: Vec<i64> = history.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, (7..12).map(|i| T0 + i).collect::<Vec<_>>());

    let nodes = store.list_nodes_at(T0 + 12).await.unwrap();
    assert_eq!(nodes[0].history.len(), 5);
}

#[tokio::test]
async fn test_memory_history_limit_returns_newest() {
    let store = MemoryStore::new(10, RttSource::First);
    for i in 0..6 {
        store.ingest_at(&report("n1", T0 + i, 0.0), T0 + i).await.unwrap();
    }
    let history = store.history("n1", 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp, T0 + 4);
    assert_eq!(history[1].timestamp, T0 + 5);
}

#[tokio::test]
async fn test_memory_unknown_node_has_empty_history() {
    let store = MemoryStore::new(10, RttSource::First);
    assert!(store.history("ghost", 10).await.unwrap().is_empty());
    assert!(store.list_nodes_at(T0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_concurrent_ingest_distinct_nodes() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(10, RttSource::First));
    assert_concurrent_nodes(store).await;
}

#[tokio::test]
async fn test_memory_mean_rtt_source() {
    let store = MemoryStore::new(10, RttSource::Mean);
    let mut r = report("n1", T0, 0.0);
    r.ping_results = vec![
        ping("10.0.0.1", 10.0, 0.0),
        ping("10.0.0.2", 0.0, 1.0),
        ping("10.0.0.3", 20.0, 0.0),
    ];
    store.ingest_at(&r, T0).await.unwrap();
    assert_eq!(store.history("n1", 1).await.unwrap()[0].ping_avg_rtt, 15.0);
}

// --- sqlite ---

#[tokio::test]
async fn test_sqlite_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 30).await;
    assert_end_to_end(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_liveness_boundary() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 30).await;
    assert_liveness_boundary(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_history_ascending_regardless_of_insert_order() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 30).await;
    for offset in [5, 1, 4, 2, 3, 0] {
        store
            .ingest_at(&report("n1", T0 + offset, offset as f64), T0)
            .await
            .unwrap();
    }
    let history = store.history("n1", 4).await.unwrap();
    let timestamps: Vec<i64> = history.iter().map(|s| s.timestamp).collect();
    assert_eq!(timestamps, vec![T0 + 2, T0 + 3, T0 + 4, T0 + 5]);
    assert!(store.history("n1", 0).await.unwrap().is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_last_seen_is_upserted() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 30).await;
    store.ingest_at(&report("n1", T0, 0.1), T0).await.unwrap();
    store.ingest_at(&report("n1", T0 + 1, 0.2), T0 + 20_000).await.unwrap();
    let nodes = store.list_nodes_at(T0 + 20_000).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].last_seen, T0 + 20_000);
    assert!(nodes[0].online);
    assert_eq!(nodes[0].history.len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_concurrent_ingest_distinct_nodes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_sqlite(&dir, 30).await);
    assert_concurrent_nodes(store.clone()).await;
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_sweep_removes_expired_rows_only() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 7).await;
    store.ingest_at(&report("n1", T0 - 8 * DAY_MS, 0.1), T0).await.unwrap();
    store.ingest_at(&report("n1", T0 - 6 * DAY_MS, 0.2), T0).await.unwrap();
    store.ingest_at(&report("n1", T0, 0.3), T0).await.unwrap();

    assert_eq!(store.sweep_expired(T0).await.unwrap(), 1);
    let history = store.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp, T0 - 6 * DAY_MS);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_sweep_disabled_for_non_positive_retention() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 0).await;
    assert_eq!(store.retention_days(), 0);
    store.ingest_at(&report("n1", 1, 0.1), T0).await.unwrap();
    assert_eq!(store.sweep_expired(T0).await.unwrap(), 0);
    assert_eq!(store.history("n1", 10).await.unwrap().len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_sweep_with_huge_retention_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 200_000_000_000).await;
    store.ingest_at(&report("n1", 1, 0.1), T0).await.unwrap();
    store.ingest_at(&report("n1", T0, 0.2), T0).await.unwrap();

    assert_eq!(store.sweep_expired(T0).await.unwrap(), 0);
    assert_eq!(store.history("n1", 10).await.unwrap().len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_background_sweep_runs_and_stops_on_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleetwatch.db");
    let store = SqliteStore::open_with_sweep_period(
        path.to_str().unwrap(),
        1,
        300,
        RttSource::First,
        Duration::from_millis(50),
    )
    .await
    .unwrap();
    let now = now_ms();
    store.ingest_at(&report("n1", 1_000, 0.1), now).await.unwrap();
    store.ingest_at(&report("n1", now, 0.2), now).await.unwrap();
    assert!(store.is_sweeping());

    let mut remaining = Vec::new();
    for _ in 0..100 {
        remaining = store.history("n1", 10).await.unwrap();
        if remaining.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp, now);

    store.close().await;
    assert!(!store.is_sweeping());
}

#[tokio::test]
async fn test_sqlite_without_retention_has_no_sweeper() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 0).await;
    assert!(!store.is_sweeping());
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let store = open_sqlite(&dir, 30).await;
    store.ingest_at(&n1_report(), T0).await.unwrap();
    store.close().await;
    drop(store);

    let reopened = open_sqlite(&dir, 30).await;
    let history = reopened.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].ping_avg_rtt, 12.3);
    reopened.close().await;
}

// --- tiered ---

async fn open_tiered(dir: &TempDir, cap: usize) -> TieredStore {
    let durable = Arc::new(open_sqlite(dir, 30).await);
    TieredStore::new(MemoryStore::new(cap, RttSource::First), durable, 64)
}

#[tokio::test]
async fn test_tiered_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = open_tiered(&dir, 300).await;
    assert_end_to_end(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_tiered_close_flushes_to_durable() {
    let dir = TempDir::new().unwrap();
    let store = open_tiered(&dir, 300).await;
    for i in 0..20 {
        store.ingest_at(&report("n1", T0 + i, 0.0), T0 + i).await.unwrap();
    }
    store.close().await;
    assert_eq!(store.forward_dropped(), 0);
    assert_eq!(store.durable_failures(), 0);

    let durable = open_sqlite(&dir, 30).await;
    assert_eq!(durable.history("n1", 100).await.unwrap().len(), 20);
    durable.close().await;
}

#[tokio::test]
async fn test_tiered_history_falls_back_to_durable() {
    let dir = TempDir::new().unwrap();
    let durable = open_sqlite(&dir, 30).await;
    durable.ingest_at(&n1_report(), T0).await.unwrap();
    durable.close().await;
    drop(durable);

    let store = open_tiered(&dir, 300).await;
    // Nothing cached yet: liveness is empty, history comes from disk.
    assert!(store.list_nodes_at(T0).await.unwrap().is_empty());
    let history = store.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cpu_load1, 0.5);
    store.close().await;
}

#[tokio::test]
async fn test_tiered_reads_are_served_from_cache_cap() {
    let dir = TempDir::new().unwrap();
    let store = open_tiered(&dir, 3).await;
    for i in 0..10 {
        store.ingest_at(&report("n1", T0 + i, 0.0), T0 + i).await.unwrap();
    }
    assert_eq!(store.history("n1", 100).await.unwrap().len(), 3);
    store.close().await;
}

#[tokio::test]
async fn test_tiered_durable_failure_keeps_cache_path() {
    let dir = TempDir::new().unwrap();
    let durable = Arc::new(open_sqlite(&dir, 30).await);
    durable.close().await;
    let store = TieredStore::new(MemoryStore::new(300, RttSource::First), durable, 64);

    store.ingest_at(&n1_report(), T0).await.unwrap();
    let history = store.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(store.list_nodes_at(T0).await.unwrap().len(), 1);

    for _ in 0..100 {
        if store.durable_failures() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.durable_failures(), 1);
    assert_eq!(store.forward_dropped(), 0);
    store.close().await;
}

#[tokio::test]
async fn test_tiered_full_queue_drops_forward_only() {
    let dir = TempDir::new().unwrap();
    let durable = Arc::new(open_sqlite(&dir, 30).await);
    let store = TieredStore::new(MemoryStore::new(300, RttSource::First), durable, 1);

    // The writer task cannot run between these ingests, so only the first one is queued.
    for i in 0..5 {
        store.ingest_at(&report("n1", T0 + i, 0.0), T0 + i).await.unwrap();
    }
    assert_eq!(store.forward_dropped(), 4);
    assert_eq!(store.history("n1", 10).await.unwrap().len(), 5);
    assert!(store.list_nodes_at(T0 + 4).await.unwrap()[0].online);

    store.close().await;
    assert_eq!(store.durable_failures(), 0);
    let reopened = open_sqlite(&dir, 30).await;
    assert_eq!(reopened.history("n1", 10).await.unwrap().len(), 1);
    reopened.close().await;
}

#[tokio::test]
async fn test_durable_stats_through_store_object() {
    let dir = TempDir::new().unwrap();
    let durable = Arc::new(open_sqlite(&dir, 30).await);
    let tiered = Arc::new(TieredStore::new(
        MemoryStore::new(300, RttSource::First),
        durable,
        1,
    ));
    let store: Arc<dyn Store> = tiered.clone();
    store.ingest_at(&report("n1", T0, 0.0), T0).await.unwrap();
    store.ingest_at(&report("n1", T0 + 1, 0.0), T0 + 1).await.unwrap();
    assert_eq!(
        store.durable_stats(),
        Some(DurableStats {
            forward_dropped: 1,
            durable_failures: 0,
        })
    );
    tiered.close().await;

    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new(10, RttSource::First));
    assert_eq!(memory.durable_stats(), None);
}
