use sysinfo::{Disks, System};

use super::types::SystemStats;

const MB: u64 = 1024 * 1024;

/// Snapshot of host usage; `sysinfo` must already be refreshed.
pub fn get_stats(worker: &str, sysinfo: &System, task_count: u64) -> SystemStats {
    SystemStats {
        worker: worker.to_string(),
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory_mb: sysinfo.total_memory() / MB,
        used_memory_mb: sysinfo.used_memory() / MB,
        total_swap_mb: sysinfo.total_swap() / MB,
        used_swap_mb: sysinfo.used_swap() / MB,
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        total_cpus: sysinfo.cpus().len() as u64,
        disk_usage: disk_usage(&Disks::new_with_refreshed_list()),
        task_count,
    }
}

fn disk_usage(disks: &Disks) -> f32 {
    let (used, total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });
    usage_percent(used, total)
}

fn usage_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}
