// Linux-specific helpers: /proc/cpuinfo model name and /proc/diskstats block counters.

use crate::models::DiskStats;

const SECTOR_BYTES: u64 = 512;

/// Read first "model name" from /proc/cpuinfo (Linux). Prefer over sysinfo when it returns "cpu0" etc.
pub(super) fn read_cpu_model_linux() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        for line in content.lines() {
            if line.starts_with("model name") {
                let name = line
                    .find(": ")
                    .map(|i| line[i + 2..].trim())
                    .filter(|s| !s.is_empty() && *s != "cpu0")?;
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Sum of whole-device counters from /proc/diskstats. `None` off Linux or if unreadable.
#[cfg(target_os = "linux")]
pub(super) fn read_diskstats_linux() -> Option<DiskStats> {
    let content = std::fs::read_to_string("/proc/diskstats").ok()?;
    Some(parse_diskstats(&content, |name| {
        std::path::Path::new("/sys/block").join(name).exists()
    }))
}

#[cfg(not(target_os = "linux"))]
pub(super) fn read_diskstats_linux() -> Option<DiskStats> {
    None
}

/// Fields: major minor name reads merged sectors_read ms_read writes merged sectors_written
/// ms_write in_flight ... Partitions and loop/ram devices are skipped so nothing is counted twice.
pub(super) fn parse_diskstats(content: &str, is_whole_device: impl Fn(&str) -> bool) -> DiskStats {
    let mut stats = DiskStats::default();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") || !is_whole_device(name) {
            continue;
        }
        let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
        stats.read_count = stats.read_count.saturating_add(num(3));
        stats.read_bytes = stats
            .read_bytes
            .saturating_add(num(5).saturating_mul(SECTOR_BYTES));
        stats.write_count = stats.write_count.saturating_add(num(7));
        stats.write_bytes = stats
            .write_bytes
            .saturating_add(num(9).saturating_mul(SECTOR_BYTES));
        stats.iops_in_progress = stats.iops_in_progress.saturating_add(num(11));
    }
    stats
}
