//! Capacity Tracker
//!
//! Admission control for WAL disk usage, one `WalDirInfo` per configured
//! directory. Writers reserve space (`pre_allocated`) before writing and
//! release it when the WAL is deleted; a background sampler keeps `used`
//! current. New WALs go to the directory with the most headroom.
//!
//! The directory set is fixed at `configure` time, so lookups need no lock.
//! Mutations take only the one directory's lock.

mod dir_info;
mod sampler;

use std::fs;
use std::path::Path;
use std::sync::Arc;

pub use dir_info::{PreallocationChange, WalDirInfo, WalDirSnapshot};
pub use sampler::{DirUsageSampler, FsUsageSampler, StaticUsageSampler};

use crate::config::WalManagerConfig;
use crate::manager::{WalManagerError, WalManagerResult};
use crate::observability::{log_event_at, log_event_with_fields, Event, Severity, WalMetrics};

const PROBE_FILE: &str = ".aerowal_probe";

/// Quota tracker over the configured WAL directories.
pub struct CapacityTracker {
    dirs: Vec<Arc<WalDirInfo>>,
    sampler: Arc<dyn DirUsageSampler>,
    disk_limit_percent: u8,
    metrics: Arc<WalMetrics>,
}

impl CapacityTracker {
    /// Validate and register the configured directories.
    ///
    /// Each directory is created if missing and probed for writability.
    /// Unusable directories are logged and skipped. Fails with `Config`
    /// when none remain.
    pub fn configure(
        config: &WalManagerConfig,
        sampler: Arc<dyn DirUsageSampler>,
        metrics: Arc<WalMetrics>,
    ) -> WalManagerResult<Self> {
        let mut dirs: Vec<Arc<WalDirInfo>> = Vec::new();

        for dir in &config.wal_dirs {
            if dirs.iter().any(|d| d.path() == dir.path.as_path()) {
                log_event_at(
                    Severity::Warn,
                    Event::DirRejected,
                    &[("dir", &dir.path.display().to_string()), ("reason", "duplicate")],
                );
                continue;
            }
            if let Err(reason) = probe_dir(&dir.path) {
                log_event_at(
                    Severity::Warn,
                    Event::DirRejected,
                    &[("dir", &dir.path.display().to_string()), ("reason", &reason)],
                );
                continue;
            }
            log_event_with_fields(
                Event::DirConfigured,
                &[
                    ("dir", &dir.path.display().to_string()),
                    ("limit_bytes", &dir.limit_bytes.to_string()),
                ],
            );
            dirs.push(Arc::new(WalDirInfo::new(
                dir.path.clone(),
                dir.limit_bytes,
                config.dir_io_failure_threshold,
            )));
        }

        if dirs.is_empty() {
            return Err(WalManagerError::Config(
                "no usable WAL directory configured".into(),
            ));
        }

        Ok(Self {
            dirs,
            sampler,
            disk_limit_percent: config.disk_limit_percent,
            metrics,
        })
    }

    pub fn dirs(&self) -> &[Arc<WalDirInfo>] {
        &self.dirs
    }

    /// Look up a configured directory by its exact path.
    pub fn find(&self, dir: &Path) -> WalManagerResult<&Arc<WalDirInfo>> {
        self.dirs
            .iter()
            .find(|d| d.path() == dir)
            .ok_or_else(|| WalManagerError::NotFound(format!("wal dir {}", dir.display())))
    }

    /// Directory owning `path` (longest matching prefix).
    pub fn dir_for_path(&self, path: &Path) -> Option<&Arc<WalDirInfo>> {
        self.dirs
            .iter()
            .filter(|d| path.starts_with(d.path()))
            .max_by_key(|d| d.path().components().count())
    }

    /// Set the quota. `None` recomputes it as a share of `free + used`.
    pub fn update_limit(&self, dir: &Path, bytes: Option<u64>) -> WalManagerResult<()> {
        let info = self.find(dir)?;
        let limit = match bytes {
            Some(limit) => limit,
            None => match self.sampler.free_space(info.path()) {
                Ok(free) => {
                    let total = free.saturating_add(info.used()) as u128;
                    (total * self.disk_limit_percent as u128 / 100) as u64
                }
                Err(e) => {
                    self.record_io_failure(info);
                    return Err(WalManagerError::io(info.path(), "probe free space", e));
                }
            },
        };
        info.set_limit(limit);
        Ok(())
    }

    /// Set sampled usage. `None` asks the sampler.
    pub fn update_used(&self, dir: &Path, bytes: Option<u64>) -> WalManagerResult<()> {
        let info = self.find(dir)?;
        let used = match bytes {
            Some(used) => used,
            None => match self.sampler.sample_used(info.path()) {
                Ok(used) => used,
                Err(e) => {
                    self.metrics.increment_sampler_failures();
                    log_event_at(
                        Severity::Warn,
                        Event::DirSampleFailed,
                        &[("dir", &info.path().display().to_string()), ("error", &e.to_string())],
                    );
                    self.record_io_failure(info);
                    return Err(WalManagerError::io(info.path(), "sample used bytes", e));
                }
            },
        };
        info.set_used(used);
        Ok(())
    }

    /// Adjust the reservation by `increase - decrease`, clamped at zero.
    pub fn update_preallocated(
        &self,
        dir: &Path,
        increase: u64,
        decrease: u64,
    ) -> WalManagerResult<()> {
        let info = self.find(dir)?;
        let change = info.adjust_pre_allocated(increase, decrease);
        if change.clamped {
            self.metrics.increment_preallocation_clamps();
            log_event_at(
                Severity::Warn,
                Event::PreallocatedUnderflow,
                &[
                    ("dir", &info.path().display().to_string()),
                    ("pre_allocated", &change.before.to_string()),
                    ("increase", &increase.to_string()),
                    ("decrease", &decrease.to_string()),
                ],
            );
        }
        Ok(())
    }

    /// `max(0, limit - used - pre_allocated)` for one directory.
    pub fn available(&self, dir: &Path) -> WalManagerResult<u64> {
        Ok(self.find(dir)?.available())
    }

    /// Highest `available` across all directories.
    pub fn max_available(&self) -> u64 {
        self.dirs.iter().map(|d| d.available()).max().unwrap_or(0)
    }

    /// Directory a new WAL should go to: the one with the most headroom.
    /// Ties go to the earliest configured. `None` when every directory is full.
    pub fn select_dir(&self) -> Option<&Arc<WalDirInfo>> {
        let mut best: Option<(&Arc<WalDirInfo>, u64)> = None;
        for dir in &self.dirs {
            let available = dir.available();
            if available == 0 {
                continue;
            }
            if best.map_or(true, |(_, b)| available > b) {
                best = Some((dir, available));
            }
        }
        best.map(|(dir, _)| dir)
    }

    /// Count an I/O failure against `info`, logging when it tips into degraded.
    pub fn record_io_failure(&self, info: &WalDirInfo) {
        let streak = info.record_io_failure();
        if streak == info.failure_threshold() {
            log_event_at(
                Severity::Error,
                Event::DirDegraded,
                &[
                    ("dir", &info.path().display().to_string()),
                    ("failures", &streak.to_string()),
                ],
            );
        }
    }

    /// One sampler pass: refresh `used` for every directory and recompute
    /// derived quotas. Errors are logged and counted, never returned.
    pub fn refresh_all(&self) {
        for dir in &self.dirs {
            if self.update_used(dir.path(), None).is_err() {
                continue;
            }
            if dir.is_auto_limit() {
                if let Err(e) = self.update_limit(dir.path(), None) {
                    log_event_at(
                        Severity::Warn,
                        Event::DirSampleFailed,
                        &[("dir", &dir.path().display().to_string()), ("error", &e.to_string())],
                    );
                    continue;
                }
            }
            let snap = dir.snapshot();
            log_event_at(
                Severity::Trace,
                Event::DirUsageSampled,
                &[
                    ("dir", &snap.path.display().to_string()),
                    ("limit", &snap.limit.to_string()),
                    ("used", &snap.used.to_string()),
                    ("pre_allocated", &snap.pre_allocated.to_string()),
                ],
            );
        }
    }

    pub fn snapshot(&self) -> Vec<WalDirSnapshot> {
        self.dirs.iter().map(|d| d.snapshot()).collect()
    }
}

/// Create `path` if needed and check that a file can be written in it.
fn probe_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path).map_err(|e| format!("cannot create: {}", e))?;
    let probe = path.join(PROBE_FILE);
    fs::write(&probe, b"").map_err(|e| format!("not writable: {}", e))?;
    fs::remove_file(&probe).map_err(|e| format!("cannot remove probe file: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalDirConfig;
    use tempfile::TempDir;

    fn tracker(dirs: Vec<WalDirConfig>, sampler: Arc<StaticUsageSampler>) -> CapacityTracker {
        let config = WalManagerConfig::with_dirs(dirs);
        CapacityTracker::configure(&config, sampler, Arc::new(WalMetrics::new())).unwrap()
    }

    #[test]
    fn test_configure_creates_missing_dirs() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("a/b/wal");
        let t = tracker(vec![WalDirConfig::new(&dir)], Arc::new(StaticUsageSampler::new()));
        assert!(dir.is_dir());
        assert_eq!(t.dirs().len(), 1);
        assert!(!dir.join(PROBE_FILE).exists());
    }

    #[test]
    fn test_configure_skips_duplicates() {
        let root = TempDir::new().unwrap();
        let t = tracker(
            vec![WalDirConfig::new(root.path()), WalDirConfig::new(root.path())],
            Arc::new(StaticUsageSampler::new()),
        );
        assert_eq!(t.dirs().len(), 1);
    }

    #[test]
    fn test_configure_fails_when_nothing_usable() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("plain_file");
        fs::write(&file, b"x").unwrap();

        let config = WalManagerConfig::with_dirs(vec![WalDirConfig::new(file.join("wal"))]);
        let result = CapacityTracker::configure(
            &config,
            Arc::new(StaticUsageSampler::new()),
            Arc::new(WalMetrics::new()),
        );
        assert!(matches!(result, Err(WalManagerError::Config(_))));
    }

    #[test]
    fn test_unknown_dir_is_not_found() {
        let root = TempDir::new().unwrap();
        let t = tracker(vec![WalDirConfig::new(root.path())], Arc::new(StaticUsageSampler::new()));
        let other = root.path().join("other");
        assert!(t.update_limit(&other, Some(1)).unwrap_err().is_not_found());
        assert!(t.update_used(&other, Some(1)).unwrap_err().is_not_found());
        assert!(t.available(&other).unwrap_err().is_not_found());
    }

    #[test]
    fn test_limit_recomputed_from_free_space() {
        let root = TempDir::new().unwrap();
        let sampler = Arc::new(StaticUsageSampler::new());
        sampler.set_free(root.path(), 9_000);
        sampler.set_used(root.path(), 1_000);
        let t = tracker(vec![WalDirConfig::new(root.path())], sampler);

        t.update_used(root.path(), None).unwrap();
        t.update_limit(root.path(), None).unwrap();
        // 10% of (9000 free + 1000 used)
        assert_eq!(t.dirs()[0].limit(), 1_000);
        assert_eq!(t.available(root.path()).unwrap(), 0);
    }

    #[test]
    fn test_select_prefers_most_available() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let t = tracker(
            vec![WalDirConfig::with_limit(a.path(), 100), WalDirConfig::with_limit(b.path(), 5_000)],
            Arc::new(StaticUsageSampler::new()),
        );
        assert_eq!(t.select_dir().unwrap().path(), b.path());
        assert_eq!(t.max_available(), 5_000);

        t.update_preallocated(b.path(), 5_000, 0).unwrap();
        assert_eq!(t.select_dir().unwrap().path(), a.path());

        t.update_preallocated(a.path(), 100, 0).unwrap();
        assert!(t.select_dir().is_none());
        assert_eq!(t.max_available(), 0);
    }

    #[test]
    fn test_sampler_failures_degrade_dir() {
        let root = TempDir::new().unwrap();
        let sampler = Arc::new(StaticUsageSampler::new());
        let t = tracker(vec![WalDirConfig::with_limit(root.path(), 1_000)], sampler.clone());

        sampler.set_failing(root.path(), true);
        for _ in 0..3 {
            assert!(t.update_used(root.path(), None).is_err());
        }
        assert_eq!(t.available(root.path()).unwrap(), 0);

        sampler.set_failing(root.path(), false);
        t.refresh_all();
        assert_eq!(t.available(root.path()).unwrap(), 1_000);
    }

    #[test]
    fn test_dir_for_path_picks_owner() {
        let root = TempDir::new().unwrap();
        let t = tracker(vec![WalDirConfig::new(root.path())], Arc::new(StaticUsageSampler::new()));
        let wal = root.path().join("1/2/1_0_3_x");
        assert_eq!(t.dir_for_path(&wal).unwrap().path(), root.path());
        assert!(t.dir_for_path(Path::new("/elsewhere/1/2/x")).is_none());
    }
}
