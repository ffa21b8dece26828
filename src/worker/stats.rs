use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Resource snapshot a worker exposes on /stats. Only plain integers and
/// floats, so the manager can decode it regardless of library versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub memory_total: u64,
    pub memory_available: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub cpu_usage: f64,
    pub task_count: u64,
}

/// Sample the host. Memory and disk are bytes; CPU usage is normalized to
/// [0, 1]. The caller refreshes `sys` before sampling.
pub fn get_stats(sys: &System, task_count: u64) -> Stats {
    let disks = Disks::new_with_refreshed_list();
    let disk_total: u64 = disks.iter().map(|disk| disk.total_space()).sum();
    let disk_available: u64 = disks.iter().map(|disk| disk.available_space()).sum();

    Stats {
        memory_total: sys.total_memory(),
        memory_available: sys.available_memory(),
        disk_total,
        disk_used: disk_total.saturating_sub(disk_available),
        cpu_usage: (sys.global_cpu_usage() as f64 / 100.0).clamp(0.0, 1.0),
        task_count,
    }
}
