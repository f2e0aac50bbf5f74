//! WAL Manager
//!
//! Lifecycle controller and public facade over the capacity tracker, the
//! WAL registry, the status and column-index ledgers and the replay
//! coordinator.
//!
//! # Locking
//!
//! Directory records, the registry, the status ledger, the column index map
//! and the table map each have their own lock. No operation holds two of
//! them at once, and none is held across filesystem I/O.
//!
//! # Lifecycle
//!
//! 1. `new` validates the config and registers usable directories
//! 2. `init` samples usage, scans every directory for leftover WALs and
//!    registers them, then starts the usage sampler, the replay driver and
//!    the replay pool
//! 3. `stop` (also run on drop) signals both threads, joins them, then
//!    drains the pool without cancelling accepted replays

mod background;
mod errors;
mod signal;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use errors::{WalManagerError, WalManagerResult};
pub use signal::BackgroundSignal;

use background::ReplayJob;

use crate::capacity::{CapacityTracker, DirUsageSampler, FsUsageSampler, WalDirSnapshot};
use crate::config::WalManagerConfig;
use crate::ledger::{
    ColumnIndexMap, StatusLedger, StatusQueueRequest, StatusQueueSizes, WalStatus,
};
use crate::observability::{
    log_event_at, log_event_with_fields, Event, Logger, ObservationScope, Severity, Timer,
    WalMetrics, WalMetricsSnapshot,
};
use crate::registry::{
    self, Registration, WalEntry, WalFileName, WalRegistry, QUARANTINE_DIR,
};
use crate::replay::{scan_wal_dir, FailedWal, ReplayExecutor, ReplayPool, RetryPolicy, TableMap};
use crate::wal::{prepare_path_for, WalReader, WalWriter, PREPARE_SUFFIX};

/// State shared with the background threads and replay tasks.
struct Shared {
    config: WalManagerConfig,
    capacity: CapacityTracker,
    registry: WalRegistry,
    status: StatusLedger,
    columns: ColumnIndexMap,
    tables: TableMap,
    retry: RetryPolicy,
    metrics: Arc<WalMetrics>,
    sampler_signal: BackgroundSignal,
    replay_signal: BackgroundSignal,
}

enum Lifecycle {
    Idle,
    Running {
        threads: Vec<JoinHandle<()>>,
        pool: Arc<ReplayPool<ReplayJob>>,
    },
    Stopped,
}

/// Coordination layer for the WAL subsystem.
pub struct WalManager {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl WalManager {
    /// Build a manager that samples directory usage from the filesystem.
    pub fn new(
        config: WalManagerConfig,
        executor: Arc<dyn ReplayExecutor>,
    ) -> WalManagerResult<Self> {
        Self::with_sampler(config, executor, Arc::new(FsUsageSampler))
    }

    /// Build a manager with an explicit directory-usage sampler.
    ///
    /// Fails with `Config` when the config is invalid or no directory is usable.
    pub fn with_sampler(
        config: WalManagerConfig,
        executor: Arc<dyn ReplayExecutor>,
        sampler: Arc<dyn DirUsageSampler>,
    ) -> WalManagerResult<Self> {
        config.validate()?;
        let metrics = Arc::new(WalMetrics::new());
        let capacity = CapacityTracker::configure(&config, sampler, Arc::clone(&metrics))?;
        let retry = RetryPolicy::from_config(&config);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                capacity,
                registry: WalRegistry::new(),
                status: StatusLedger::new(),
                columns: ColumnIndexMap::new(),
                tables: TableMap::new(executor),
                retry,
                metrics,
                sampler_signal: BackgroundSignal::new(),
                replay_signal: BackgroundSignal::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================
    // Lifecycle
    // ==================

    /// Recover leftover WALs and start the background threads.
    pub fn init(&self) -> WalManagerResult<()> {
        let mut lifecycle = self.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(WalManagerError::Internal(
                "WAL manager can only be initialised once".into(),
            ));
        }

        let timer = Timer::new();
        log_event_with_fields(
            Event::ManagerInitBegin,
            &[("dirs", &self.shared.capacity.dirs().len().to_string())],
        );

        self.shared.refresh_dirs();
        self.shared.recover_all();

        match self.start_threads() {
            Ok(running) => {
                *lifecycle = running;
                log_event_with_fields(
                    Event::ManagerInitComplete,
                    &[
                        ("wals", &self.shared.registry.len().to_string()),
                        ("elapsed_ms", &timer.elapsed_ms()),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                log_event_with_fields(
                    Event::ManagerInitFailed,
                    &[("code", e.code()), ("error", &e.to_string())],
                );
                Err(e)
            }
        }
    }

    fn start_threads(&self) -> WalManagerResult<Lifecycle> {
        let config = &self.shared.config;
        let shared = Arc::clone(&self.shared);
        let pool = ReplayPool::start(
            "aerowal-replay",
            config.replay_threads,
            config.replay_queue_size,
            move |job: ReplayJob| shared.run_replay(job),
        )
        .map_err(|e| WalManagerError::Internal(format!("cannot start replay pool: {}", e)))?;
        let pool = Arc::new(pool);

        let mut threads = Vec::with_capacity(2);

        let shared = Arc::clone(&self.shared);
        match spawn("aerowal-dir-info", move || shared.sampler_loop()) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                pool.shutdown();
                return Err(e);
            }
        }

        let shared = Arc::clone(&self.shared);
        let driver_pool = Arc::clone(&pool);
        match spawn("aerowal-replay-driver", move || shared.driver_loop(&driver_pool)) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                self.shared.sampler_signal.stop();
                join_all(threads);
                pool.shutdown();
                return Err(e);
            }
        }

        Ok(Lifecycle::Running { threads, pool })
    }

    /// Stop both background threads and drain the replay pool.
    ///
    /// Idempotent. A stopped manager cannot be restarted.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped);
        self.shared.sampler_signal.stop();
        self.shared.replay_signal.stop();

        if let Lifecycle::Running { threads, pool } = previous {
            let timer = Timer::new();
            log_event_with_fields(
                Event::ManagerStopBegin,
                &[("in_flight", &pool.in_flight().to_string())],
            );
            join_all(threads);
            pool.shutdown();
            log_event_with_fields(
                Event::ManagerStopComplete,
                &[("elapsed_ms", &timer.elapsed_ms())],
            );
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running { .. })
    }

    // ==================
    // Capacity
    // ==================

    /// Set a directory's quota. `None` recomputes it from free space.
    pub fn update_wal_dir_limit(&self, dir: &Path, limit: Option<u64>) -> WalManagerResult<()> {
        self.shared.capacity.update_limit(dir, limit)
    }

    /// Set a directory's used bytes. `None` asks the usage sampler.
    pub fn update_wal_dir_used(&self, dir: &Path, used: Option<u64>) -> WalManagerResult<()> {
        self.shared.capacity.update_used(dir, used)
    }

    /// Adjust a directory's reservation by `increase - decrease` (clamped at zero).
    pub fn update_wal_dir_pre_allocated(
        &self,
        dir: &Path,
        increase: u64,
        decrease: u64,
    ) -> WalManagerResult<()> {
        self.shared.capacity.update_preallocated(dir, increase, decrease)
    }

    pub fn get_wal_dir_available_size(&self, dir: &Path) -> WalManagerResult<u64> {
        self.shared.capacity.available(dir)
    }

    pub fn get_max_available_size(&self) -> u64 {
        self.shared.capacity.max_available()
    }

    /// Configured directories that passed validation, in config order.
    pub fn wal_dirs(&self) -> Vec<PathBuf> {
        self.shared
            .capacity
            .dirs()
            .iter()
            .map(|d| d.path().to_path_buf())
            .collect()
    }

    pub fn capacity_snapshot(&self) -> Vec<WalDirSnapshot> {
        self.shared.capacity.snapshot()
    }

    // ==================
    // Registry
    // ==================

    /// Pick a directory, derive the WAL's path, register it and create its
    /// table directory.
    ///
    /// Fails with `ResourceExhausted` when no directory has free quota and
    /// with `AlreadyExists` when `wal_id` is registered.
    pub fn create_wal_path(
        &self,
        db_id: i64,
        table_id: i64,
        wal_id: i64,
        label: &str,
    ) -> WalManagerResult<PathBuf> {
        let shared = &self.shared;
        let dir = match shared.capacity.select_dir() {
            Some(dir) => Arc::clone(dir),
            None => {
                shared.metrics.increment_admissions_rejected();
                log_event_at(
                    Severity::Warn,
                    Event::AdmissionRejected,
                    &[("wal_id", &wal_id.to_string()), ("table_id", &table_id.to_string())],
                );
                return Err(WalManagerError::ResourceExhausted(format!(
                    "no WAL directory has free quota for wal {}",
                    wal_id
                )));
            }
        };

        let name = WalFileName::new(shared.config.backend_id, wal_id, label);
        let path = registry::wal_path(dir.path(), db_id, table_id, &name);
        shared.registry.insert(WalEntry {
            wal_id,
            db_id,
            table_id,
            label: name.label.clone(),
            path: path.clone(),
        })?;

        let table_dir = registry::table_dir(dir.path(), db_id, table_id);
        if let Err(e) = fs::create_dir_all(&table_dir) {
            shared.capacity.record_io_failure(&dir);
            if let Err(rollback) = shared.registry.remove(wal_id) {
                Logger::warn(
                    "WAL_PATH_ROLLBACK_FAILED",
                    &[("wal_id", &wal_id.to_string()), ("error", &rollback.to_string())],
                );
            }
            return Err(WalManagerError::io(table_dir, "create wal table dir", e));
        }

        shared.record_status(table_id, wal_id, WalStatus::Prepare);
        shared.metrics.increment_paths_created();
        log_event_with_fields(
            Event::PathCreated,
            &[
                ("wal_id", &wal_id.to_string()),
                ("table_id", &table_id.to_string()),
                ("path", &path.display().to_string()),
            ],
        );
        Ok(path)
    }

    pub fn get_wal_path(&self, wal_id: i64) -> WalManagerResult<PathBuf> {
        self.shared.registry.get_path(wal_id)
    }

    /// Unlink a WAL, forget it along with its status and column index, and
    /// give `pre_allocated_to_release` bytes back to its directory. Deleting
    /// an unknown wal_id succeeds.
    pub fn delete_wal(&self, wal_id: i64, pre_allocated_to_release: u64) -> WalManagerResult<()> {
        self.shared.delete_wal(wal_id, pre_allocated_to_release)
    }

    /// Register a WAL that is already on disk and queue it for replay.
    ///
    /// No quota check. A path ending in `.prepare` is registered as
    /// incomplete and sealed before replay. Re-adding a wal_id already
    /// registered at the same path is accepted.
    pub fn add_recover_wal(
        &self,
        db_id: i64,
        table_id: i64,
        wal_id: i64,
        path: impl AsRef<Path>,
    ) -> WalManagerResult<()> {
        self.shared.recover_wal(db_id, table_id, wal_id, path.as_ref())
    }

    /// Every registered WAL, ordered by wal_id.
    pub fn registered_wals(&self) -> WalManagerResult<Vec<WalEntry>> {
        self.shared.registry.entries()
    }

    // ==================
    // Status & column index ledger
    // ==================

    pub fn set_wal_status(
        &self,
        table_id: i64,
        wal_id: i64,
        status: WalStatus,
    ) -> WalManagerResult<()> {
        self.shared.status.set_status(table_id, wal_id, status)
    }

    pub fn get_wal_status(&self, table_id: i64, wal_id: i64) -> WalManagerResult<WalStatus> {
        self.shared.status.get_status(table_id, wal_id)
    }

    pub fn erase_wal_status(&self, table_id: i64, wal_id: i64) -> WalManagerResult<()> {
        self.shared.status.erase_status(table_id, wal_id)
    }

    pub fn query_status_queue_sizes(
        &self,
        request: &StatusQueueRequest,
    ) -> WalManagerResult<StatusQueueSizes> {
        self.shared.status.query_status_queue_sizes(request)
    }

    pub fn log_status_queues(&self) -> WalManagerResult<()> {
        self.shared.status.log_queues()
    }

    pub fn add_wal_column_index(&self, wal_id: i64, indices: Vec<usize>) -> WalManagerResult<()> {
        self.shared.columns.set(wal_id, indices)
    }

    pub fn get_wal_column_index(&self, wal_id: i64) -> WalManagerResult<Vec<usize>> {
        self.shared.columns.get(wal_id)
    }

    pub fn erase_wal_column_index(&self, wal_id: i64) -> WalManagerResult<()> {
        self.shared.columns.erase(wal_id)
    }

    // ==================
    // Codec handles
    // ==================

    /// Open a writer at the registered path of `wal_id`. The header records
    /// the WAL's column index mapping if one was set.
    pub fn create_wal_writer(&self, wal_id: i64) -> WalManagerResult<WalWriter> {
        let path = self.shared.registry.get_path(wal_id)?;
        let columns = match self.shared.columns.get(wal_id) {
            Ok(columns) => columns,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(WalWriter::create(&path, &columns)?)
    }

    pub fn create_wal_reader(&self, path: &Path) -> WalManagerResult<WalReader> {
        Ok(WalReader::open(path)?)
    }

    // ==================
    // Replay
    // ==================

    /// Queued plus in-flight WALs of one table (0 for an unknown table).
    pub fn wal_table_size(&self, table_id: i64) -> WalManagerResult<usize> {
        Ok(self
            .shared
            .tables
            .get(table_id)?
            .map(|t| t.size())
            .unwrap_or(0))
    }

    /// WALs of one table that failed permanently and were quarantined.
    pub fn failed_wals(&self, table_id: i64) -> WalManagerResult<Vec<FailedWal>> {
        Ok(self
            .shared
            .tables
            .get(table_id)?
            .map(|t| t.failed())
            .unwrap_or_default())
    }

    /// Forget a table's replay state. Returns whether it existed.
    pub fn drop_wal_table(&self, table_id: i64) -> WalManagerResult<bool> {
        Ok(self.shared.tables.remove(table_id)?.is_some())
    }

    /// Run one driver pass now. Returns the number of replays submitted.
    pub fn drive_replay_once(&self) -> WalManagerResult<usize> {
        let pool = match &*self.lifecycle() {
            Lifecycle::Running { pool, .. } => Arc::clone(pool),
            _ => return Err(WalManagerError::Internal("WAL manager is not running".into())),
        };
        Ok(self.shared.drive_once(&pool)?.submitted)
    }

    /// Wait until no replay is in flight and nothing is ready to replay.
    /// WALs waiting out a retry backoff do not count. Returns false on timeout.
    pub fn wait_replay_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.replay_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn metrics(&self) -> WalMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &WalManagerConfig {
        &self.shared.config
    }
}

impl Drop for WalManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Record a status change. The ledger is diagnostic, so a rejected
    /// transition is logged rather than returned.
    fn record_status(&self, table_id: i64, wal_id: i64, status: WalStatus) {
        if let Err(e) = self.status.set_status(table_id, wal_id, status) {
            log_event_at(
                Severity::Warn,
                Event::StatusQueue,
                &[
                    ("wal_id", &wal_id.to_string()),
                    ("table_id", &table_id.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
    }

    /// Drop a WAL from the status ledger and column index map.
    fn forget_metadata(&self, table_id: i64, wal_id: i64) {
        if let Err(e) = self.status.erase_status(table_id, wal_id) {
            if !e.is_not_found() {
                log_event_at(
                    Severity::Warn,
                    Event::StatusQueue,
                    &[("wal_id", &wal_id.to_string()), ("error", &e.to_string())],
                );
            }
        }
        if let Err(e) = self.columns.erase(wal_id) {
            log_event_at(
                Severity::Warn,
                Event::StatusQueue,
                &[("wal_id", &wal_id.to_string()), ("error", &e.to_string())],
            );
        }
    }

    fn delete_wal(&self, wal_id: i64, pre_allocated_to_release: u64) -> WalManagerResult<()> {
        let entry = match self.registry.get(wal_id) {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        for path in [prepare_path_for(&entry.path), entry.path.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    if let Some(dir) = self.capacity.dir_for_path(&path) {
                        self.capacity.record_io_failure(dir);
                    }
                    return Err(WalManagerError::io(path, "unlink wal", e));
                }
            }
        }

        // A concurrent delete may have won; only the remover releases.
        if self.registry.remove(wal_id)?.is_none() {
            return Ok(());
        }
        self.forget_metadata(entry.table_id, wal_id);
        if pre_allocated_to_release > 0 {
            if let Some(dir) = self.capacity.dir_for_path(&entry.path) {
                self.capacity
                    .update_preallocated(dir.path(), 0, pre_allocated_to_release)?;
            }
        }

        self.metrics.increment_wals_deleted();
        log_event_with_fields(
            Event::WalDeleted,
            &[
                ("wal_id", &wal_id.to_string()),
                ("path", &entry.path.display().to_string()),
                ("released", &pre_allocated_to_release.to_string()),
            ],
        );
        Ok(())
    }

    fn recover_wal(
        &self,
        db_id: i64,
        table_id: i64,
        wal_id: i64,
        path: &Path,
    ) -> WalManagerResult<()> {
        let incomplete = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(PREPARE_SUFFIX));
        let final_path = registry::final_path_of(path);
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = WalFileName::parse(&file_name)
            .map(|n| n.label)
            .unwrap_or(file_name);

        let entry = WalEntry {
            wal_id,
            db_id,
            table_id,
            label,
            path: final_path,
        };
        let registration = self.registry.register_recovered(entry.clone())?;

        let table = self.tables.get_or_create(table_id)?;
        if table.contains(wal_id) {
            return Ok(());
        }
        let status = if incomplete {
            WalStatus::Prepare
        } else {
            WalStatus::Create
        };
        self.record_status(table_id, wal_id, status);
        table.enqueue(entry);

        if registration == Registration::Inserted {
            self.metrics.increment_wals_recovered();
        }
        log_event_with_fields(
            Event::WalRecovered,
            &[
                ("wal_id", &wal_id.to_string()),
                ("table_id", &table_id.to_string()),
                ("status", status.as_str()),
                ("path", &path.display().to_string()),
            ],
        );
        self.replay_signal.wake();
        Ok(())
    }

    /// First usage sample and quota computation, plus quarantine dirs.
    fn refresh_dirs(&self) {
        self.capacity.refresh_all();
        for dir in self.capacity.dirs() {
            let quarantine = dir.path().join(QUARANTINE_DIR);
            if let Err(e) = fs::create_dir_all(&quarantine) {
                self.capacity.record_io_failure(dir);
                log_event_at(
                    Severity::Warn,
                    Event::DirSampleFailed,
                    &[("dir", &quarantine.display().to_string()), ("error", &e.to_string())],
                );
            }
        }
    }

    /// Scan every directory and register WALs not already tracked.
    fn recover_all(&self) {
        for dir in self.capacity.dirs() {
            let dir_name = dir.path().display().to_string();
            let scope =
                ObservationScope::with_fields(Event::RecoveryScan.as_str(), &[("dir", &dir_name)]);

            let report = match scan_wal_dir(dir.path()) {
                Ok(report) => report,
                Err(e) => {
                    self.capacity.record_io_failure(dir);
                    scope.fail(&e.to_string());
                    continue;
                }
            };

            let mut recovered = 0usize;
            for wal in &report.found {
                match self.registry.contains(wal.wal_id) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        log_event_at(
                            Severity::Error,
                            Event::RecoverySkipped,
                            &[("path", &wal.path.display().to_string()), ("error", &e.to_string())],
                        );
                        continue;
                    }
                }
                match self.recover_wal(wal.db_id, wal.table_id, wal.wal_id, &wal.path) {
                    Ok(()) => recovered += 1,
                    Err(e) => log_event_at(
                        Severity::Warn,
                        Event::RecoverySkipped,
                        &[
                            ("path", &wal.path.display().to_string()),
                            ("reason", &e.to_string()),
                        ],
                    ),
                }
            }

            scope.complete_with_fields(&[
                ("found", &report.found.len().to_string()),
                ("recovered", &recovered.to_string()),
                ("skipped", &report.skipped.to_string()),
            ]);
        }
    }
}

fn spawn<F>(name: &str, body: F) -> WalManagerResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| WalManagerError::Internal(format!("cannot spawn {}: {}", name, e)))
}

fn join_all(threads: Vec<JoinHandle<()>>) {
    for handle in threads {
        let name = handle.thread().name().unwrap_or("background").to_string();
        if handle.join().is_err() {
            Logger::error("WAL_BACKGROUND_THREAD_PANICKED", &[("thread", &name)]);
        }
    }
}
