// Wire messages carried over the report stream (JSON, camelCase).

use serde::{Deserialize, Serialize};

use super::{CpuStats, DiskStats, KvmStats, MemStats, NetStats};

/// Probe protocol tag; serializes to lowercase JSON (e.g. "tcpping").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Tcpping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub ip: String,
    pub port: u16,
    #[serde(rename = "type", default)]
    pub kind: ProbeKind,
}

impl Target {
    pub fn tcp(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            kind: ProbeKind::Tcpping,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub target: Target,
    pub min_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    /// Failed attempts / attempts, in [0, 1].
    pub packet_loss: f64,
}

/// One reduced reporting cycle for a node (agent -> controller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub node_id: String,
    /// Reduction time, millis since epoch.
    pub timestamp: i64,
    pub cpu: CpuStats,
    pub mem: MemStats,
    pub disk: DiskStats,
    pub net: NetStats,
    pub kvm: KvmStats,
    #[serde(default)]
    pub ping_results: Vec<PingResult>,
}

/// Controller -> agent. Sent once per Report and asynchronously for target reassignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe_targets: Vec<Target>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "ok".into(),
            probe_targets: vec![],
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            probe_targets: vec![],
        }
    }

    pub fn reassign(targets: Vec<Target>) -> Self {
        Self {
            success: true,
            message: "probe targets updated".into(),
            probe_targets: targets,
        }
    }
}
