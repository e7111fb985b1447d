// Concurrent TCP-connect prober. Each cycle works on a snapshot of the target set;
// controller reassignments swap the whole set atomically.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::models::{PingResult, ProbeKind, Target};

/// Gap between attempts to the same target, so bursts don't trip remote rate limits.
pub const INTER_ATTEMPT_DELAY: Duration = Duration::from_millis(50);

pub struct Prober {
    targets: RwLock<Arc<Vec<Target>>>,
}

impl Prober {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: RwLock::new(Arc::new(targets)),
        }
    }

    /// Current target set. Later reassignments do not affect the returned snapshot.
    pub fn targets(&self) -> Arc<Vec<Target>> {
        match self.targets.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the whole target set; visible to the next `run_cycle`.
    pub fn update_targets(&self, targets: Vec<Target>) {
        let next = Arc::new(targets);
        match self.targets.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Probes every target concurrently, `count` attempts each. Results keep target order.
    #[instrument(skip(self), fields(operation = "probe_cycle"))]
    pub async fn run_cycle(&self, count: u32, attempt_timeout: Duration) -> Vec<PingResult> {
        let snapshot = self.targets();
        let handles: Vec<_> = snapshot
            .iter()
            .cloned()
            .map(|target| tokio::spawn(probe_target(target, count, attempt_timeout)))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (joined, target) in join_all(handles).await.into_iter().zip(snapshot.iter()) {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, target = %target.ip, "probe task failed");
                    results.push(unreachable(target.clone()));
                }
            }
        }
        results
    }
}

fn unreachable(target: Target) -> PingResult {
    PingResult {
        target,
        min_rtt_ms: 0.0,
        max_rtt_ms: 0.0,
        avg_rtt_ms: 0.0,
        packet_loss: 1.0,
    }
}

async fn probe_target(target: Target, count: u32, attempt_timeout: Duration) -> PingResult {
    if target.kind != ProbeKind::Tcpping {
        warn!(target = %target.ip, kind = ?target.kind, "unsupported probe type");
        return unreachable(target);
    }

    let count = count.max(1);
    let mut rtts: Vec<f64> = Vec::with_capacity(count as usize);
    for attempt in 0..count {
        if attempt > 0 {
            tokio::time::sleep(INTER_ATTEMPT_DELAY).await;
        }
        match connect_once(&target, attempt_timeout).await {
            Some(rtt) => rtts.push(rtt),
            None => debug!(target = %target.ip, port = target.port, attempt, "probe attempt failed"),
        }
    }
    summarize(target, count, &rtts)
}

/// RTT in ms of one connect, or `None` on refusal/timeout.
async fn connect_once(target: &Target, attempt_timeout: Duration) -> Option<f64> {
    let start = Instant::now();
    match timeout(
        attempt_timeout,
        TcpStream::connect((target.ip.as_str(), target.port)),
    )
    .await
    {
        Ok(Ok(stream)) => {
            let rtt = start.elapsed().as_secs_f64() * 1000.0;
            drop(stream);
            Some(rtt)
        }
        _ => None,
    }
}

/// Reduces successful attempt RTTs: min/max/avg over successes (0 if none), loss = failed / count.
pub fn summarize(target: Target, count: u32, rtts: &[f64]) -> PingResult {
    let count = count.max(1);
    let failed = count.saturating_sub(rtts.len() as u32);
    let (min_rtt_ms, max_rtt_ms, avg_rtt_ms) = if rtts.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
        (min, max, avg)
    };
    PingResult {
        target,
        min_rtt_ms,
        max_rtt_ms,
        avg_rtt_ms,
        packet_loss: failed as f64 / count as f64,
    }
}
