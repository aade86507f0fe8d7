use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use tracing::info;

use crate::utils::content_length;

static RX_BYTES: AtomicU64 = AtomicU64::new(0);
static TX_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn add_rx(bytes: u64) {
    RX_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

pub fn add_tx(bytes: u64) {
    TX_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub fn network_metrics() -> NetworkMetrics {
    NetworkMetrics {
        rx_bytes: RX_BYTES.load(Ordering::Relaxed),
        tx_bytes: TX_BYTES.load(Ordering::Relaxed),
    }
}

/// Counts request bodies by their declared length.
pub async fn count_traffic(req: Request<Body>, next: Next) -> Response {
    if let Some(len) = content_length(req.headers()) {
        add_rx(len);
    }
    next.run(req).await
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub architecture: &'static str,
    pub hostname: String,
    pub memory_mb: f64,
    pub num_cpu: usize,
    pub num_workers: usize,
    pub num_tasks: usize,
    pub pid: u32,
    pub platform: &'static str,
    pub uptime: u64,
}

pub fn process_status(started: Instant) -> ProcessStatus {
    let (num_workers, num_tasks) = match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            (metrics.num_workers(), metrics.num_alive_tasks())
        }
        Err(_) => (0, 0),
    };
    ProcessStatus {
        architecture: std::env::consts::ARCH,
        hostname: hostname(),
        memory_mb: resident_memory_mb(),
        num_cpu: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        num_workers,
        num_tasks,
        pid: std::process::id(),
        platform: std::env::consts::OS,
        uptime: started.elapsed().as_secs(),
    }
}

pub fn log_status(status: &ProcessStatus) {
    info!(
        "status: up {} [{} workers] [{} tasks] [{:.2} MB]",
        format_uptime(Duration::from_secs(status.uptime)),
        status.num_workers,
        status.num_tasks,
        status.memory_mb
    );
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86400, secs % 86400 / 3600, secs % 3600 / 60, secs % 60);
    if days > 0 {
        format!("{}d{:02}h{:02}m{:02}s", days, hours, minutes, seconds)
    } else {
        format!("{:02}h{:02}m{:02}s", hours, minutes, seconds)
    }
}

fn hostname() -> String {
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn resident_memory_mb() -> f64 {
    // Second field of statm is resident pages.
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(statm) => statm,
        Err(_) => return 0.0,
    };
    let pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    (pages * 4096) as f64 / (1024.0 * 1024.0)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_mb() -> f64 {
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = network_metrics();
        add_rx(10);
        add_tx(25);
        let after = network_metrics();
        assert!(after.rx_bytes >= before.rx_bytes + 10);
        assert!(after.tx_bytes >= before.tx_bytes + 25);
    }

    #[test]
    fn uptime_formats() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "00h00m59s");
        assert_eq!(format_uptime(Duration::from_secs(90061)), "1d01h01m01s");
    }

    #[tokio::test]
    async fn status_reports_the_runtime() {
        let status = process_status(Instant::now());
        assert!(status.num_cpu >= 1);
        assert!(status.num_workers >= 1);
        assert_eq!(status.pid, std::process::id());
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("numCpu").is_some());
        assert!(value.get("memoryMb").is_some());
    }
}
