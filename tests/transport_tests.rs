// Agent stream client and runtime against a live controller on an ephemeral port

mod common;

use async_trait::async_trait;
use common::{report, sample};
use fleetwatch::agent::{self, AgentDeps, AgentStats, AgentTiming};
use fleetwatch::ingest::{DownlinkRegistry, IngestStats};
use fleetwatch::models::{Ack, RawSample, Target};
use fleetwatch::prober::Prober;
use fleetwatch::routes;
use fleetwatch::sampler::Sampler;
use fleetwatch::storage::{MemoryStore, RttSource, Store};
use fleetwatch::transport::{StreamClient, TransportError};
use fleetwatch::window::AggregationWindow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

struct Controller {
    url: String,
    store: Arc<MemoryStore>,
    downlinks: Arc<DownlinkRegistry>,
}

async fn start_controller() -> Controller {
    let store = Arc::new(MemoryStore::new(300, RttSource::First));
    let downlinks = Arc::new(DownlinkRegistry::new());
    let app = routes::app(
        store.clone(),
        downlinks.clone(),
        Arc::new(IngestStats::default()),
        300,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Controller {
        url: format!("ws://{}/ws/report", addr),
        store,
        downlinks,
    }
}

fn client(url: &str, prober: Arc<Prober>) -> StreamClient {
    StreamClient::new(url, Duration::from_secs(2), prober)
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn test_send_then_close_drains_acks() {
    let controller = start_controller().await;
    let mut client = client(&controller.url, Arc::new(Prober::new(vec![])));
    client.connect().await.unwrap();
    assert!(client.is_connected());

    for i in 0..3 {
        client.send(&report("n1", 100 + i, 0.2)).await.unwrap();
    }
    let counters = client.counters();
    client.close().await;

    assert_eq!(counters.received.load(Ordering::Relaxed), 3);
    assert_eq!(counters.rejected.load(Ordering::Relaxed), 0);
    assert_eq!(controller.store.history("n1", 10).await.unwrap().len(), 3);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_close_without_connect_is_safe() {
    let mut client = client("ws://127.0.0.1:1/ws/report", Arc::new(Prober::new(vec![])));
    client.close().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_refused_is_reported() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let mut client = client(
        &format!("ws://127.0.0.1:{}/ws/report", port),
        Arc::new(Prober::new(vec![])),
    );
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }));
}

#[tokio::test]
async fn test_connect_times_out_when_handshake_stalls() {
    // Accepts TCP but never answers the upgrade request.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let mut client = StreamClient::new(
        format!("ws://{}/ws/report", addr),
        Duration::from_millis(200),
        Arc::new(Prober::new(vec![])),
    );
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectTimeout { timeout_ms: 200, .. }));
}

#[tokio::test]
async fn test_downlink_reassigns_prober_targets() {
    let controller = start_controller().await;
    let prober = Arc::new(Prober::new(vec![Target::tcp("8.8.8.8", 53)]));
    let mut client = client(&controller.url, prober.clone());
    client.connect().await.unwrap();
    client.send(&report("n1", 1, 0.1)).await.unwrap();

    let downlinks = controller.downlinks.clone();
    assert!(wait_until(|| downlinks.is_connected("n1")).await);
    let targets = vec![Target::tcp("10.1.1.1", 22)];
    assert!(controller.downlinks.send("n1", Ack::reassign(targets.clone())));

    assert!(wait_until(|| *prober.targets() == targets).await);
    client.close().await;
    assert!(wait_until(|| !downlinks.is_connected("n1")).await);
}

#[tokio::test]
async fn test_report_cycle_reconnects_and_sends() {
    let controller = start_controller().await;
    let window = AggregationWindow::new("n1");
    let stats = AgentStats::default();
    let mut client = client(&controller.url, Arc::new(Prober::new(vec![])));

    window.push(sample(0.7, 2)).unwrap();
    agent::report_cycle(&window, &mut client, &stats).await;
    client.close().await;

    assert_eq!(stats.connect_attempts.load(Ordering::Relaxed), 1);
    assert_eq!(stats.reports_sent.load(Ordering::Relaxed), 1);
    let history = controller.store.history("n1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cpu_load1, 0.7);
    assert_eq!(history[0].net_burst, 2);
}

#[tokio::test]
async fn test_report_cycle_drops_report_when_controller_unreachable() {
    let window = AggregationWindow::new("n1");
    let stats = AgentStats::default();
    let mut client = StreamClient::new(
        "ws://127.0.0.1:1/ws/report",
        Duration::from_millis(200),
        Arc::new(Prober::new(vec![])),
    );

    window.push(sample(0.7, 0)).unwrap();
    agent::report_cycle(&window, &mut client, &stats).await;

    assert_eq!(stats.reports_dropped.load(Ordering::Relaxed), 1);
    assert_eq!(stats.reports_sent.load(Ordering::Relaxed), 0);
    // Dropped, not buffered for the next cycle.
    assert!(window.is_empty());
}

struct FixedSampler(RawSample);

#[async_trait]
impl Sampler for FixedSampler {
    async fn sample(&self) -> anyhow::Result<RawSample> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_agent_loops_report_until_shutdown() {
    let controller = start_controller().await;
    let prober = Arc::new(Prober::new(vec![]));
    let stats = Arc::new(AgentStats::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = agent::spawn(
        AgentDeps {
            sampler: Arc::new(FixedSampler(sample(1.5, 4))),
            window: Arc::new(AggregationWindow::new("agent-1")),
            prober: prober.clone(),
            client: client(&controller.url, prober),
            stats: stats.clone(),
            shutdown_rx,
        },
        AgentTiming {
            sample_interval_ms: 10,
            report_interval_ms: 100,
            probe_interval_ms: 50,
            attempt_count: 1,
            attempt_timeout_ms: 100,
            stats_log_interval_secs: 60,
        },
    );

    tokio::time::sleep(Duration::from_millis(450)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    let sent = stats.reports_sent.load(Ordering::Relaxed);
    assert!(sent >= 2, "expected several reports, got {}", sent);
    assert_eq!(stats.reports_dropped.load(Ordering::Relaxed), 0);
    let history = controller.store.history("agent-1", 100).await.unwrap();
    assert_eq!(history.len() as u64, sent);
    assert!(history.iter().all(|s| s.cpu_load1 == 1.5 && s.net_burst == 4));
    let nodes = controller.store.list_nodes().await.unwrap();
    assert!(nodes[0].online);
}
