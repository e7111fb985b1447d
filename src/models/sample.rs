// One instantaneous host reading. The same dimension structs are reused in Report.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub model_name: String,
    pub cores: u32,
    pub mhz: f64,
    pub usage_per_core: Vec<f64>,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Cumulative block device counters plus the current in-flight op count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub iops_in_progress: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetStats {
    pub bytes_recv: u64,
    pub bytes_sent: u64,
    pub packets_recv: u64,
    pub packets_sent: u64,
    /// Burst events seen by the packet instrumentation since the last sample.
    pub microburst_events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvmStats {
    pub total_vms: u32,
    pub active_vms: u32,
    pub total_alloc_vcpu: u32,
    pub total_alloc_mem: u64,
}

/// Produced by a `Sampler`; never persisted directly, only its reduction is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub cpu: CpuStats,
    pub mem: MemStats,
    pub disk: DiskStats,
    pub net: NetStats,
    pub kvm: KvmStats,
}
