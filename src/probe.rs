//! Best-effort host resource probes.
//!
//! External-collaborator territory: everything here reads `/proc` and sysfs
//! on Linux and degrades to `None`/"unknown" elsewhere or on any read error.
//! Nothing in the core depends on these values being present.

use std::path::Path;

use serde::Serialize;

/// Snapshot of host resource figures for the system metrics group.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetrics {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    #[serde(rename = "diskRemainingGb")]
    pub disk_remaining_gb: f64,
    #[serde(rename = "tempC")]
    pub temp_c: Option<f64>,
    pub uptime: String,
}

/// Collect all probes. `data_dir` anchors the free-disk measurement.
pub fn collect(data_dir: &Path) -> HostMetrics {
    let disk_target = if data_dir.exists() {
        data_dir
    } else {
        Path::new("/")
    };

    HostMetrics {
        cpu: read_cpu_percent(),
        memory: read_memory_percent(),
        disk_remaining_gb: disk_remaining_gb(disk_target).unwrap_or(0.0),
        temp_c: read_temp_c(),
        uptime: format_uptime(read_uptime_seconds()),
    }
}

/// Render uptime seconds as a compact human string, "unknown" when absent.
pub fn format_uptime(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else {
        return "unknown".to_string();
    };
    let total = seconds as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn read_uptime_seconds() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/uptime").ok()?;
    raw.split_whitespace().next()?.parse::<f64>().ok()
}

fn read_memory_percent() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb = rest.split_whitespace().next()?.parse::<f64>().ok()?;
        match key.trim() {
            "MemTotal" => total = Some(kb),
            "MemAvailable" => available = Some(kb),
            _ => {}
        }
    }
    let (total, available) = (total?, available?);
    if total <= 0.0 {
        return None;
    }
    Some(round1(((total - available) / total) * 100.0))
}

fn read_cpu_percent() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load = raw.split_whitespace().next()?.parse::<f64>().ok()?;
    let cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1) as f64;
    Some(round1(((load / cpus) * 100.0).min(100.0)))
}

fn read_temp_c() -> Option<f64> {
    for zone in ["thermal_zone0", "thermal_zone1"] {
        let path = format!("/sys/class/thermal/{zone}/temp");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(value) = raw.trim().parse::<i64>() else {
            continue;
        };
        // Kernel reports millidegrees on most boards.
        if value > 1_000 {
            return Some(round1(value as f64 / 1_000.0));
        }
        return Some(value as f64);
    }
    None
}

/// Free disk space in GB for the filesystem holding `path`.
#[cfg(unix)]
pub fn disk_remaining_gb(path: &Path) -> Option<f64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Some(round1(free as f64 / 1_073_741_824.0))
}

#[cfg(not(unix))]
pub fn disk_remaining_gb(_path: &Path) -> Option<f64> {
    None
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
