use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::now_unix;
use library::{CatalogCounts, CatalogError, Library, OrphanStats, ScanError, ScanOptions, ScanStats};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::status::{log_status, process_status};

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceState {
    pub scanning: bool,
    pub collecting: bool,
    pub last_scan: Option<i64>,
    pub last_scan_stats: Option<ScanStats>,
    pub last_orphans: Option<i64>,
    pub last_orphan_stats: Option<OrphanStats>,
    pub last_error: Option<String>,
}

/// `/status?metrics=database` payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetrics {
    pub counts: CatalogCounts,
    pub last_scan: Option<i64>,
    pub last_scan_stats: Option<ScanStats>,
    pub last_orphan_stats: Option<OrphanStats>,
}

#[derive(Default)]
struct Inner {
    state: MaintenanceState,
    database: Option<DatabaseMetrics>,
}

/// Background scan and orphan passes. At most one pass runs at a time; the
/// library's writer lock serializes them against anything else.
#[derive(Clone)]
pub struct Maintenance {
    library: Library,
    inner: Arc<RwLock<Inner>>,
    cancel: Arc<AtomicBool>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

enum Pass {
    Scan(ScanOptions),
    Orphans,
}

impl Maintenance {
    pub fn new(library: Library, shutdown: CancellationToken) -> Self {
        Self {
            library,
            inner: Arc::new(RwLock::new(Inner::default())),
            cancel: Arc::new(AtomicBool::new(false)),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Queues a scan followed by an orphan pass. False when a pass is
    /// already running or shutdown has begun.
    pub fn start_scan(&self, options: ScanOptions) -> bool {
        self.start(Pass::Scan(options))
    }

    pub fn start_orphans(&self) -> bool {
        self.start(Pass::Orphans)
    }

    fn start(&self, pass: Pass) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        {
            let mut inner = self.inner.write();
            if inner.state.scanning || inner.state.collecting {
                return false;
            }
            match pass {
                Pass::Scan(_) => inner.state.scanning = true,
                Pass::Orphans => inner.state.collecting = true,
            }
        }

        let library = self.library.clone();
        let cancel = Arc::clone(&self.cancel);
        let inner = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            let result = tokio::task::spawn_blocking(move || run_pass(&library, pass, &cancel)).await;

            let mut guard = inner.write();
            guard.state.scanning = false;
            guard.state.collecting = false;
            guard.database = None;
            match result {
                Ok(Ok((scan, orphans))) => {
                    let now = now_unix();
                    if let Some(scan) = scan {
                        guard.state.last_scan = Some(now);
                        guard.state.last_scan_stats = Some(scan);
                    }
                    guard.state.last_orphans = Some(now);
                    guard.state.last_orphan_stats = Some(orphans);
                    guard.state.last_error = None;
                }
                Ok(Err(ScanError::Cancelled)) => {
                    info!("scan: cancelled");
                    guard.state.last_error = Some(ScanError::Cancelled.to_string());
                }
                Ok(Err(err)) => {
                    warn!("scan: failed: {}", err);
                    guard.state.last_error = Some(err.to_string());
                }
                Err(err) => {
                    warn!("scan: worker failed: {}", err);
                    guard.state.last_error = Some(err.to_string());
                }
            }
        });
        true
    }

    pub fn snapshot(&self) -> MaintenanceState {
        self.inner.read().state.clone()
    }

    pub fn is_running(&self) -> bool {
        let inner = self.inner.read();
        inner.state.scanning || inner.state.collecting
    }

    /// Blocking on a cold cache. Cached until the next pass completes.
    pub fn database_metrics(&self) -> Result<DatabaseMetrics, CatalogError> {
        if let Some(cached) = self.inner.read().database.clone() {
            return Ok(cached);
        }
        let counts = self.library.catalog().counts()?;
        let mut inner = self.inner.write();
        let metrics = DatabaseMetrics {
            counts,
            last_scan: inner.state.last_scan,
            last_scan_stats: inner.state.last_scan_stats.clone(),
            last_orphan_stats: inner.state.last_orphan_stats.clone(),
        };
        if !inner.state.scanning && !inner.state.collecting {
            inner.database = Some(metrics.clone());
        }
        Ok(metrics)
    }

    /// Orphan passes and status lines on fixed intervals until shutdown.
    /// Shutdown also raises the cancel flag seen by a running pass.
    pub fn spawn_periodic(&self, orphan_every: Duration, status_every: Duration, started: Instant) {
        let this = self.clone();
        let orphan_every = orphan_every.max(Duration::from_secs(1));
        let status_every = status_every.max(Duration::from_secs(1));
        self.tracker.spawn(async move {
            let now = tokio::time::Instant::now();
            let mut orphans = tokio::time::interval_at(now + orphan_every, orphan_every);
            let mut status = tokio::time::interval_at(now + status_every, status_every);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => {
                        this.cancel.store(true, Ordering::Relaxed);
                        break;
                    }
                    _ = orphans.tick() => {
                        if !this.start_orphans() {
                            debug!("orphans: skipped, library busy");
                        }
                    }
                    _ = status.tick() => log_status(&process_status(started)),
                }
            }
        });
    }

    /// Waits for the running pass and the periodic task to finish.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn run_pass(
    library: &Library,
    pass: Pass,
    cancel: &AtomicBool,
) -> Result<(Option<ScanStats>, OrphanStats), ScanError> {
    let scan = match pass {
        Pass::Scan(options) => Some(library.scan(options, cancel)?),
        Pass::Orphans => None,
    };
    let orphans = library.collect_orphans(None, cancel)?;
    Ok((scan, orphans))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_library;

    #[tokio::test]
    async fn scan_pass_records_stats() {
        let (_dir, library) = seeded_library();
        let maintenance = Maintenance::new(library, CancellationToken::new());

        assert!(maintenance.start_scan(ScanOptions::default()));
        maintenance.wait().await;

        let state = maintenance.snapshot();
        assert!(!state.scanning);
        assert!(state.last_scan.is_some());
        assert_eq!(state.last_scan_stats.unwrap().songs_added, 2);
        assert_eq!(state.last_orphan_stats.unwrap().songs, 0);
        assert!(state.last_error.is_none());

        let metrics = maintenance.database_metrics().unwrap();
        assert_eq!(metrics.counts.songs, 2);
        assert_eq!(metrics.counts.artists, 2);
    }

    #[tokio::test]
    async fn database_metrics_refresh_after_a_pass() {
        let (dir, library) = seeded_library();
        let maintenance = Maintenance::new(library, CancellationToken::new());
        assert_eq!(maintenance.database_metrics().unwrap().counts.songs, 0);

        assert!(maintenance.start_scan(ScanOptions::default()));
        maintenance.wait().await;
        assert_eq!(maintenance.database_metrics().unwrap().counts.songs, 2);

        std::fs::remove_file(dir.path().join("music/ArtistA/AlbumA/01.mp3")).unwrap();
        assert!(maintenance.start_orphans());
        maintenance.wait().await;
        let metrics = maintenance.database_metrics().unwrap();
        assert_eq!(metrics.counts.songs, 1);
        assert_eq!(metrics.last_orphan_stats.unwrap().songs, 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_passes_and_stops_the_timer() {
        let (_dir, library) = seeded_library();
        let shutdown = CancellationToken::new();
        let maintenance = Maintenance::new(library, shutdown.clone());
        maintenance.spawn_periodic(Duration::from_secs(3600), Duration::from_secs(3600), Instant::now());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), maintenance.wait())
            .await
            .unwrap();
        assert!(!maintenance.start_scan(ScanOptions::default()));
        assert!(maintenance.cancel.load(Ordering::Relaxed));
    }
}
