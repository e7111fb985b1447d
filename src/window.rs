// Aggregation window: buffers high-frequency samples and reduces them into one Report per cycle.
// Scalar gauges are last-value-wins; the burst counter is the window maximum.

use std::sync::Mutex;

use crate::models::{PingResult, RawSample, Report, now_ms};

#[derive(Default)]
struct WindowState {
    samples: Vec<RawSample>,
    ping_results: Vec<PingResult>,
    last_timestamp: i64,
}

pub struct AggregationWindow {
    node_id: String,
    state: Mutex<WindowState>,
}

impl AggregationWindow {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Appends one sample to the current cycle.
    pub fn push(&self, sample: RawSample) -> anyhow::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("window lock poisoned: {}", e))?;
        state.samples.push(sample);
        Ok(())
    }

    /// Replaces the prober batch attached to the next report.
    pub fn set_ping_results(&self, results: Vec<PingResult>) -> anyhow::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("window lock poisoned: {}", e))?;
        state.ping_results = results;
        Ok(())
    }

    /// Samples pushed since the last reduction.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reduces and clears the window. `Ok(None)` when no sample arrived this cycle.
    pub fn reduce(&self) -> anyhow::Result<Option<Report>> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("window lock poisoned: {}", e))?;

        let samples = std::mem::take(&mut state.samples);
        let Some(latest) = samples.last() else {
            return Ok(None);
        };

        let max_burst = samples
            .iter()
            .map(|s| s.net.microburst_events)
            .max()
            .unwrap_or(0);

        // Strictly increasing even if the wall clock steps back.
        let timestamp = now_ms().max(state.last_timestamp + 1);
        state.last_timestamp = timestamp;

        let mut net = latest.net.clone();
        net.microburst_events = max_burst;

        Ok(Some(Report {
            node_id: self.node_id.clone(),
            timestamp,
            cpu: latest.cpu.clone(),
            mem: latest.mem.clone(),
            disk: latest.disk.clone(),
            net,
            kvm: latest.kvm.clone(),
            ping_results: std::mem::take(&mut state.ping_results),
        }))
    }
}
