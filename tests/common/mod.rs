// Shared test helpers
#![allow(dead_code)]

use fleetwatch::models::*;

pub fn sample(load1: f64, burst: u64) -> RawSample {
    RawSample {
        cpu: CpuStats {
            model_name: "test-cpu".into(),
            cores: 4,
            load1,
            ..Default::default()
        },
        mem: MemStats {
            total: 1000,
            available: 400,
            used: 600,
            used_percent: 60.0,
            ..Default::default()
        },
        net: NetStats {
            microburst_events: burst,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn ping(ip: &str, avg: f64, loss: f64) -> PingResult {
    PingResult {
        target: Target::tcp(ip, 80),
        min_rtt_ms: avg,
        max_rtt_ms: avg,
        avg_rtt_ms: avg,
        packet_loss: loss,
    }
}

pub fn report(node_id: &str, timestamp: i64, load1: f64) -> Report {
    let s = sample(load1, 0);
    Report {
        node_id: node_id.into(),
        timestamp,
        cpu: s.cpu,
        mem: s.mem,
        disk: s.disk,
        net: s.net,
        kvm: s.kvm,
        ping_results: vec![],
    }
}
