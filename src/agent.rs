// Agent runtime: sampling, probing and reporting loops.
// Samples feed the aggregation window; the reporter reduces it once per cycle and hands the
// Report to the stream client. A failed send drops that cycle's report (at-most-once).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::Instrument;

use crate::prober::Prober;
use crate::sampler::Sampler;
use crate::transport::StreamClient;
use crate::window::AggregationWindow;

/// Collaborators and shutdown for the agent loops.
pub struct AgentDeps {
    pub sampler: Arc<dyn Sampler>,
    pub window: Arc<AggregationWindow>,
    pub prober: Arc<Prober>,
    pub client: StreamClient,
    pub stats: Arc<AgentStats>,
    /// Loops stop when this flips to `true` (or the sender is dropped).
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Loop timing. Stats logging uses real seconds, independent of the sampling interval.
#[derive(Debug, Clone)]
pub struct AgentTiming {
    pub sample_interval_ms: u64,
    pub report_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub attempt_count: u32,
    pub attempt_timeout_ms: u64,
    pub stats_log_interval_secs: u64,
}

impl AgentTiming {
    pub fn from_config(config: &crate::config::AgentConfig) -> Self {
        Self {
            sample_interval_ms: config.agent.sample_interval_ms,
            report_interval_ms: config.agent.report_interval_ms,
            probe_interval_ms: config.prober.interval_ms,
            attempt_count: config.prober.attempt_count,
            attempt_timeout_ms: config.prober.attempt_timeout_ms,
            stats_log_interval_secs: config.agent.stats_log_interval_secs,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentStats {
    pub samples_taken: AtomicU64,
    pub sample_failures: AtomicU64,
    pub probe_cycles: AtomicU64,
    pub reports_sent: AtomicU64,
    pub reports_dropped: AtomicU64,
    pub connect_attempts: AtomicU64,
}

/// Spawns the sampler, prober and reporter loops. The returned handle resolves once all three
/// have finished their in-flight cycle after shutdown and the stream has been closed.
pub fn spawn(deps: AgentDeps, timing: AgentTiming) -> JoinHandle<()> {
    let AgentDeps {
        sampler,
        window,
        prober,
        client,
        stats,
        shutdown_rx,
    } = deps;

    let sampler_handle = spawn_sampler(
        sampler,
        window.clone(),
        stats.clone(),
        Duration::from_millis(timing.sample_interval_ms),
        shutdown_rx.clone(),
    );
    let prober_handle = spawn_prober(
        prober,
        window.clone(),
        stats.clone(),
        &timing,
        shutdown_rx.clone(),
    );
    let reporter_handle = spawn_reporter(window, client, stats, &timing, shutdown_rx);

    tokio::spawn(async move {
        let (s, p, r) = tokio::join!(sampler_handle, prober_handle, reporter_handle);
        for (name, result) in [("sampler", s), ("prober", p), ("reporter", r)] {
            if let Err(e) = result {
                tracing::warn!(error = %e, task = name, "agent task ended abnormally");
            }
        }
        tracing::debug!("Agent loops stopped");
    })
}

fn spawn_sampler(
    sampler: Arc<dyn Sampler>,
    window: Arc<AggregationWindow>,
    stats: Arc<AgentStats>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let sample = match sampler.sample().await {
                        Ok(s) => s,
                        Err(e) => {
                            stats.sample_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(error = %e, operation = "sample", "sampling failed");
                            continue;
                        }
                    };
                    if let Err(e) = window.push(sample) {
                        tracing::warn!(error = %e, operation = "push_sample", "window push failed");
                        continue;
                    }
                    stats.samples_taken.fetch_add(1, Ordering::Relaxed);
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("Sampler shutting down");
    })
}

fn spawn_prober(
    prober: Arc<Prober>,
    window: Arc<AggregationWindow>,
    stats: Arc<AgentStats>,
    timing: &AgentTiming,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_millis(timing.probe_interval_ms);
    let count = timing.attempt_count;
    let attempt_timeout = Duration::from_millis(timing.attempt_timeout_ms);
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // An in-flight cycle finishes before the stop signal is observed.
                    let results = prober.run_cycle(count, attempt_timeout).await;
                    stats.probe_cycles.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = window.set_ping_results(results) {
                        tracing::warn!(error = %e, operation = "set_ping_results", "window update failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("Prober shutting down");
    })
}

fn spawn_reporter(
    window: Arc<AggregationWindow>,
    mut client: StreamClient,
    stats: Arc<AgentStats>,
    timing: &AgentTiming,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_millis(timing.report_interval_ms);
    let stats_log_interval = Duration::from_secs(timing.stats_log_interval_secs);
    let span = tracing::span!(tracing::Level::DEBUG, "reporter", node_id = %window.node_id());
    let task = async move {
        let acks = client.counters();
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; the first report waits a full window.
        tick.tick().await;
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    report_cycle(&window, &mut client, &stats).await;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        samples_taken = stats.samples_taken.load(Ordering::Relaxed),
                        probe_cycles = stats.probe_cycles.load(Ordering::Relaxed),
                        reports_sent = stats.reports_sent.load(Ordering::Relaxed),
                        reports_dropped = stats.reports_dropped.load(Ordering::Relaxed),
                        acks_received = acks.received.load(Ordering::Relaxed),
                        acks_rejected = acks.rejected.load(Ordering::Relaxed),
                        "agent stats"
                    );
                }
                _ = shutdown_rx.changed() => {
                    tracing::debug!("Reporter shutting down");
                    break;
                }
            }
        }
        // Samples gathered since the last tick still make one last report.
        if client.is_connected() {
            report_cycle(&window, &mut client, &stats).await;
        }
        client.close().await;
    };
    tokio::spawn(task.instrument(span))
}

/// One reporting cycle: reconnect if the previous send broke the stream, reduce, send.
pub async fn report_cycle(
    window: &AggregationWindow,
    client: &mut StreamClient,
    stats: &AgentStats,
) {
    if !client.is_connected() {
        stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = client.connect().await {
            tracing::warn!(error = %e, operation = "connect", "report stream unavailable");
        }
    }

    let report = match window.reduce() {
        Ok(Some(r)) => r,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, operation = "reduce", "window reduce failed");
            return;
        }
    };

    match client.send(&report).await {
        Ok(()) => {
            stats.reports_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.reports_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                operation = "send_report",
                timestamp = report.timestamp,
                "report dropped"
            );
        }
    }
}
