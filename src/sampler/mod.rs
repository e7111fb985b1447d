// Raw host sampling via sysinfo. The aggregation pipeline only sees the `Sampler` trait.

mod linux;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{Disks, Networks, System};
use tracing::instrument;

use crate::models::{CpuStats, DiskStats, KvmStats, MemStats, NetStats, RawSample};

/// Produces one raw snapshot per call.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self) -> anyhow::Result<RawSample>;
}

struct SysinfoState {
    sys: System,
    disks: Disks,
    networks: Networks,
}

/// Host sampler. Burst events and VM inventory come from kernel/hypervisor
/// instrumentation that is not wired here, so those fields stay zero.
pub struct SysinfoSampler {
    state: Arc<Mutex<SysinfoState>>,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        // CPU usage needs a baseline refresh before the first real reading.
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            state: Arc::new(Mutex::new(SysinfoState {
                sys,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
            })),
        }
    }
}

#[async_trait]
impl Sampler for SysinfoSampler {
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "sample"))]
    async fn sample(&self) -> anyhow::Result<RawSample> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            let SysinfoState {
                sys,
                disks,
                networks,
            } = &mut *guard;

            Ok(RawSample {
                cpu: sample_cpu(sys),
                mem: sample_mem(sys),
                disk: sample_disk(disks),
                net: sample_net(networks),
                kvm: KvmStats::default(),
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

fn sample_cpu(sys: &mut System) -> CpuStats {
    sys.refresh_cpu_all();
    let cpus = sys.cpus();
    let model_name = linux::read_cpu_model_linux()
        .or_else(|| {
            cpus.first()
                .map(|c| c.brand().trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "Unknown".into());
    let load = System::load_average();
    CpuStats {
        model_name,
        cores: cpus.len() as u32,
        mhz: cpus.first().map(|c| c.frequency() as f64).unwrap_or(0.0),
        usage_per_core: cpus
            .iter()
            .map(|c| (c.cpu_usage() as f64).clamp(0.0, 100.0))
            .collect(),
        load1: load.one,
        load5: load.five,
        load15: load.fifteen,
    }
}

fn sample_mem(sys: &mut System) -> MemStats {
    sys.refresh_memory();
    let total = sys.total_memory();
    let available = sys.available_memory();
    let used = total.saturating_sub(available);
    let used_percent = if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    MemStats {
        total,
        available,
        used,
        used_percent,
        swap_total: sys.total_swap(),
        swap_free: sys.free_swap(),
    }
}

fn sample_disk(disks: &mut Disks) -> DiskStats {
    if let Some(stats) = linux::read_diskstats_linux() {
        return stats;
    }
    disks.refresh(false);
    disks
        .list()
        .iter()
        .fold(DiskStats::default(), |mut acc, d| {
            let usage = d.usage();
            acc.read_bytes = acc.read_bytes.saturating_add(usage.total_read_bytes);
            acc.write_bytes = acc.write_bytes.saturating_add(usage.total_written_bytes);
            acc
        })
}

fn sample_net(networks: &mut Networks) -> NetStats {
    networks.refresh(true);
    networks
        .list()
        .values()
        .fold(NetStats::default(), |mut acc, data| {
            acc.bytes_recv = acc.bytes_recv.saturating_add(data.total_received());
            acc.bytes_sent = acc.bytes_sent.saturating_add(data.total_transmitted());
            acc.packets_recv = acc
                .packets_recv
                .saturating_add(data.total_packets_received());
            acc.packets_sent = acc
                .packets_sent
                .saturating_add(data.total_packets_transmitted());
            acc
        })
}
