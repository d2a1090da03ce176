//! Disk retention sweeper.
//!
//! Two prune passes run on a schedule (and once at startup): staged frame
//! files past a maximum age, and event archive directories whose ISO-date
//! names fall outside the retention horizon. Both are idempotent and treat
//! per-entry failures as non-fatal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;

/// Counts of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub staged_files_removed: u64,
    pub event_dirs_removed: u64,
}

/// Prunes staged frames and dated event archives on a fixed schedule.
#[derive(Clone)]
pub struct RetentionSweeper {
    staging_dir: PathBuf,
    events_dir: PathBuf,
    staging_max_age: Duration,
    retention_days: u32,
    sweep_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl RetentionSweeper {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        config: &RetentionConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            events_dir: PathBuf::from(&config.events_dir),
            staging_max_age: config.staging_max_age,
            retention_days: config.retention_days,
            sweep_interval: config.sweep_interval,
            shutdown,
        }
    }

    /// Spawn the sweep loop on a dedicated thread. Sweeps immediately, then
    /// every `sweep_interval` until shutdown is signalled.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(self) {
        info!(
            staging_dir = %self.staging_dir.display(),
            events_dir = %self.events_dir.display(),
            retention_days = self.retention_days,
            "retention sweeper started"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            let report = self.sweep_once();
            if report.staged_files_removed > 0 || report.event_dirs_removed > 0 {
                info!(
                    staged_files = report.staged_files_removed,
                    event_dirs = report.event_dirs_removed,
                    "retention sweep removed entries"
                );
            }
            // Sleep in short slices so shutdown is picked up promptly.
            let mut remaining = self.sweep_interval;
            while !remaining.is_zero() && !self.shutdown.load(Ordering::Relaxed) {
                let slice = remaining.min(Duration::from_millis(200));
                thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }
        info!("retention sweeper stopped");
    }

    /// One full sweep: staged files first, then event archives.
    pub fn sweep_once(&self) -> SweepReport {
        SweepReport {
            staged_files_removed: self.prune_staging(),
            event_dirs_removed: self.prune_events(Utc::now().date_naive()),
        }
    }

    /// Remove staged files whose mtime is older than the cutoff, then drop
    /// any directories left empty. A missing staging root is a no-op.
    fn prune_staging(&self) -> u64 {
        let cutoff = SystemTime::now() - self.staging_max_age;
        let mut removed = 0u64;
        let mut dirs: Vec<PathBuf> = Vec::new();
        prune_files_older_than(&self.staging_dir, cutoff, &mut removed, &mut dirs);

        // Children sort after parents, so deleting deepest-first empties
        // nested directories bottom up.
        dirs.sort();
        for dir in dirs.iter().rev() {
            match fs::remove_dir(dir) {
                Ok(()) => debug!(path = %dir.display(), "removed empty staging dir"),
                // Non-empty or already gone, leave it.
                Err(_) => {}
            }
        }
        removed
    }

    /// Remove event archive date directories on or before the horizon.
    ///
    /// Layout is `events_dir/<device_id>/<YYYY-MM-DD>/`. Directories whose
    /// names do not parse as a date are left alone.
    fn prune_events(&self, today: NaiveDate) -> u64 {
        let Some(horizon) = today.checked_sub_signed(ChronoDuration::days(i64::from(
            self.retention_days,
        ))) else {
            return 0;
        };

        let devices = match fs::read_dir(&self.events_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0u64;
        for device in devices.flatten() {
            let device_path = device.path();
            if !device_path.is_dir() {
                continue;
            }
            let dates = match fs::read_dir(&device_path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %device_path.display(), error = %e, "cannot list event archive");
                    continue;
                }
            };
            for entry in dates.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                    continue;
                };
                if date > horizon {
                    continue;
                }
                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "removed expired event archive");
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to remove event archive")
                    }
                }
            }
        }
        removed
    }
}

/// Walk `dir` removing files older than `cutoff`, collecting subdirectories
/// for a later empty-dir pass. Errors are logged and skipped.
fn prune_files_older_than(
    dir: &Path,
    cutoff: SystemTime,
    removed: &mut u64,
    dirs: &mut Vec<PathBuf>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path.clone());
            prune_files_older_than(&path, cutoff, removed, dirs);
            continue;
        }
        let mtime = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat staged file");
                continue;
            }
        };
        if mtime >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale staged file");
                *removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staged file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    fn sweeper(staging: &Path, events: &Path, max_age: Duration, days: u32) -> RetentionSweeper {
        let config = RetentionConfig {
            events_dir: events.to_string_lossy().into_owned(),
            staging_max_age: max_age,
            retention_days: days,
            sweep_interval: Duration::from_secs(3600),
        };
        RetentionSweeper::new(staging, &config, Arc::new(AtomicBool::new(false)))
    }

    fn write_with_age(path: &Path, age: Duration) {
        fs::write(path, b"jpeg").unwrap();
        let mtime = SystemTime::now() - age;
        set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
    }

    #[test]
    fn test_prune_staging_removes_only_stale_files() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();

        write_with_age(&staging.join("cam-1-1.jpg"), Duration::from_secs(48 * 3600));
        write_with_age(&staging.join("cam-1-2.jpg"), Duration::from_secs(60));

        let sweeper = sweeper(
            &staging,
            &dir.path().join("events"),
            Duration::from_secs(24 * 3600),
            7,
        );
        let report = sweeper.sweep_once();

        assert_eq!(report.staged_files_removed, 1);
        assert!(!staging.join("cam-1-1.jpg").exists());
        assert!(staging.join("cam-1-2.jpg").exists());
    }

    #[test]
    fn test_prune_staging_drops_emptied_subdirs() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let nested = staging.join("cam-1").join("old");
        fs::create_dir_all(&nested).unwrap();
        write_with_age(&nested.join("frame.jpg"), Duration::from_secs(48 * 3600));

        let sweeper = sweeper(
            &staging,
            &dir.path().join("events"),
            Duration::from_secs(24 * 3600),
            7,
        );
        sweeper.sweep_once();

        assert!(!nested.exists());
        assert!(!staging.join("cam-1").exists());
        assert!(staging.exists(), "root staging dir is kept");
    }

    #[test]
    fn test_prune_events_by_date_horizon() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("events");
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();

        let device = events.join("cam-1");
        fs::create_dir_all(device.join("2026-08-20")).unwrap(); // 10 days old
        fs::create_dir_all(device.join("2026-08-23")).unwrap(); // exactly at horizon
        fs::create_dir_all(device.join("2026-08-29")).unwrap(); // fresh
        fs::create_dir_all(device.join("notes")).unwrap(); // unparsable, kept
        fs::write(device.join("2026-08-20").join("ev.json"), b"{}").unwrap();

        let sweeper = sweeper(&dir.path().join("staging"), &events, Duration::from_secs(1), 7);
        let removed = sweeper.prune_events(today);

        assert_eq!(removed, 2);
        assert!(!device.join("2026-08-20").exists());
        assert!(!device.join("2026-08-23").exists(), "horizon date inclusive");
        assert!(device.join("2026-08-29").exists());
        assert!(device.join("notes").exists());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        write_with_age(&staging.join("stale.jpg"), Duration::from_secs(48 * 3600));

        let sweeper = sweeper(
            &staging,
            &dir.path().join("events"),
            Duration::from_secs(24 * 3600),
            7,
        );
        assert_eq!(sweeper.sweep_once().staged_files_removed, 1);
        assert_eq!(sweeper.sweep_once(), SweepReport::default());
    }

    #[test]
    fn test_missing_roots_are_noops() {
        let dir = tempdir().unwrap();
        let sweeper = sweeper(
            &dir.path().join("absent-staging"),
            &dir.path().join("absent-events"),
            Duration::from_secs(1),
            7,
        );
        assert_eq!(sweeper.sweep_once(), SweepReport::default());
    }
}
