//! Information gathering for `info` actions: system load, directory
//! listings, network counters.

use crate::plan::{ExecutionResult, InfoDetails};
use serde_json::json;
use sysinfo::{Disks, Networks, System};

const FILE_LIST_LIMIT: usize = 50;

pub fn gather(details: &InfoDetails) -> ExecutionResult {
    let info = match details.kind.as_str() {
        "system" => system_info(),
        "files" => file_info(&details.path),
        "network" => network_info(),
        _ => json!({"message": "Information gathered"}),
    };

    ExecutionResult {
        info: Some(info),
        ..ExecutionResult::ok()
    }
}

fn system_info() -> serde_json::Value {
    let mut sys = System::new_all();
    // First refresh gathers data, the second calculates usage.
    sys.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    sys.refresh_memory();

    let cpu_percent = sys.global_cpu_info().cpu_usage();

    let total = sys.total_memory();
    let memory_percent = if total == 0 {
        0.0
    } else {
        sys.used_memory() as f64 / total as f64 * 100.0
    };

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks
        .iter()
        .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
    let disk_percent = if disk_total == 0 {
        0.0
    } else {
        (disk_total - disk_available) as f64 / disk_total as f64 * 100.0
    };

    let boot_time = chrono::DateTime::from_timestamp(System::boot_time() as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    json!({
        "cpu_percent": ((cpu_percent as f64) * 10.0).round() / 10.0,
        "memory_percent": (memory_percent * 10.0).round() / 10.0,
        "memory_available_gb": gib(sys.available_memory()),
        "disk_percent": (disk_percent * 10.0).round() / 10.0,
        "process_count": sys.processes().len(),
        "boot_time": boot_time,
    })
}

fn file_info(path: &str) -> serde_json::Value {
    match std::fs::read_dir(path) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            json!({
                "path": path,
                "file_count": names.len(),
                "files": names.iter().take(FILE_LIST_LIMIT).collect::<Vec<_>>(),
            })
        }
        Err(_) => json!({"error": format!("Cannot read directory: {}", path)}),
    }
}

fn network_info() -> serde_json::Value {
    let networks = Networks::new_with_refreshed_list();
    let mut bytes_sent = 0u64;
    let mut bytes_recv = 0u64;
    let mut packets_sent = 0u64;
    let mut packets_recv = 0u64;

    for (_name, data) in &networks {
        bytes_sent += data.total_transmitted();
        bytes_recv += data.total_received();
        packets_sent += data.total_packets_transmitted();
        packets_recv += data.total_packets_received();
    }

    json!({
        "bytes_sent_mb": mib(bytes_sent),
        "bytes_recv_mb": mib(bytes_recv),
        "packets_sent": packets_sent,
        "packets_recv": packets_recv,
    })
}

fn gib(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0 * 1024.0) * 100.0).round() / 100.0
}

fn mib(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
