//! Replay driver: success cleanup, transient retries, quarantine and drain on stop

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use aerowal::registry::{quarantine_path, QUARANTINE_DIR};
use aerowal::{
    ReplayError, ReplayExecutor, StaticUsageSampler, WalDirConfig, WalEntry, WalManager,
    WalManagerConfig, WalStatus,
};
use tempfile::TempDir;

/// One call seen by the executor.
#[derive(Debug, Clone)]
struct Call {
    wal_id: i64,
    columns: Option<Vec<usize>>,
    file_existed: bool,
}

/// Returns scripted results per wal_id, then `fallback` once a script runs out.
struct ScriptedExecutor {
    scripts: Mutex<HashMap<i64, VecDeque<Result<(), ReplayError>>>>,
    fallback: Result<(), ReplayError>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    finished: AtomicUsize,
}

impl ScriptedExecutor {
    fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    fn with_fallback(fallback: Result<(), ReplayError>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            finished: AtomicUsize::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::succeeding()
        }
    }

    fn script(&self, wal_id: i64, results: Vec<Result<(), ReplayError>>) {
        self.scripts.lock().unwrap().insert(wal_id, results.into());
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, wal_id: i64) -> usize {
        self.calls().iter().filter(|c| c.wal_id == wal_id).count()
    }
}

impl ReplayExecutor for ScriptedExecutor {
    fn replay(&self, entry: &WalEntry, columns: Option<&[usize]>) -> Result<(), ReplayError> {
        self.calls.lock().unwrap().push(Call {
            wal_id: entry.wal_id,
            columns: columns.map(|c| c.to_vec()),
            file_existed: entry.path.exists(),
        });
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let result = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&entry.wal_id)
            .and_then(|s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

fn config(dir: &Path) -> WalManagerConfig {
    let mut config = WalManagerConfig::with_dirs(vec![WalDirConfig::with_limit(dir, 1 << 20)]);
    config.replay_threads = 2;
    config.replay_queue_size = 8;
    config.replay_interval_ms = 20;
    config.dir_info_update_interval_ms = 50;
    config.replay_backoff_base_ms = 0;
    config.replay_backoff_max_ms = 0;
    config
}

/// Panics on every WAL.
struct PanickingExecutor;

impl ReplayExecutor for PanickingExecutor {
    fn replay(&self, _: &WalEntry, _: Option<&[usize]>) -> Result<(), ReplayError> {
        panic!("executor bug")
    }
}

/// Replays by swapping the WAL file for a directory of the same name, which
/// no unlink can remove.
#[derive(Default)]
struct UndeletableExecutor {
    calls: AtomicUsize,
}

impl ReplayExecutor for UndeletableExecutor {
    fn replay(&self, entry: &WalEntry, _: Option<&[usize]>) -> Result<(), ReplayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::remove_file(&entry.path).map_err(|e| ReplayError::permanent(e.to_string()))?;
        fs::create_dir(&entry.path).map_err(|e| ReplayError::permanent(e.to_string()))?;
        Ok(())
    }
}

fn start(config: WalManagerConfig, executor: Arc<dyn ReplayExecutor>) -> WalManager {
    let m = WalManager::with_sampler(config, executor, Arc::new(StaticUsageSampler::new()))
        .unwrap();
    m.init().unwrap();
    m
}

/// Write a finished WAL through the manager, then hand it to replay.
fn write_and_recover(m: &WalManager, db_id: i64, table_id: i64, wal_id: i64) -> PathBuf {
    m.create_wal_path(db_id, table_id, wal_id, "load").unwrap();
    let mut writer = m.create_wal_writer(wal_id).unwrap();
    writer.append_block(b"rows").unwrap();
    let path = writer.finish().unwrap();
    m.set_wal_status(table_id, wal_id, WalStatus::Create).unwrap();
    m.add_recover_wal(db_id, table_id, wal_id, &path).unwrap();
    path
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_success_forgets_everything() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let m = start(config(dir.path()), executor.clone());

    m.create_wal_path(1, 2, 3, "load").unwrap();
    m.add_wal_column_index(3, vec![1, 0]).unwrap();
    let mut writer = m.create_wal_writer(3).unwrap();
    writer.append_block(b"rows").unwrap();
    let path = writer.finish().unwrap();
    m.set_wal_status(2, 3, WalStatus::Create).unwrap();
    m.add_recover_wal(1, 2, 3, &path).unwrap();

    assert!(wait_until(Duration::from_secs(10), || m.metrics().replay_succeeded == 1));
    assert!(m.wait_replay_idle(Duration::from_secs(5)));

    assert!(!path.exists());
    assert!(m.get_wal_path(3).unwrap_err().is_not_found());
    assert!(m.get_wal_status(2, 3).unwrap_err().is_not_found());
    assert!(m.get_wal_column_index(3).unwrap_err().is_not_found());
    assert_eq!(m.wal_table_size(2).unwrap(), 0);
    assert!(m.failed_wals(2).unwrap().is_empty());

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].columns, Some(vec![1, 0]));
    assert!(calls[0].file_existed);
    m.stop();
}

#[test]
fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    executor.script(
        3,
        vec![
            Err(ReplayError::transient("backend busy")),
            Err(ReplayError::transient("backend busy")),
        ],
    );
    let m = start(config(dir.path()), executor.clone());

    let path = write_and_recover(&m, 1, 2, 3);
    assert!(wait_until(Duration::from_secs(10), || m.metrics().replay_succeeded == 1));

    let metrics = m.metrics();
    assert_eq!(metrics.replay_retried, 2);
    assert_eq!(metrics.replay_failed, 0);
    assert_eq!(executor.calls_for(3), 3);
    assert!(!path.exists());
    assert!(m.get_wal_path(3).unwrap_err().is_not_found());
    m.stop();
}

#[test]
fn test_retry_ceiling_quarantines_wal() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::with_fallback(Err(ReplayError::transient(
        "backend busy",
    ))));
    let mut config = config(dir.path());
    config.replay_retry_ceiling = 2;
    let m = start(config, executor.clone());

    let path = write_and_recover(&m, 1, 2, 3);
    assert!(wait_until(Duration::from_secs(10), || m
        .failed_wals(2)
        .unwrap()
        .len()
        == 1));

    let failed = m.failed_wals(2).unwrap();
    assert_eq!(failed[0].entry.wal_id, 3);
    assert_eq!(failed[0].attempts, 2);
    assert!(failed[0].reason.contains("backend busy"));
    assert_eq!(executor.calls_for(3), 2);

    let quarantined = quarantine_path(dir.path(), 1, 2, &path);
    assert_eq!(quarantined.parent().unwrap(), dir.path().join(QUARANTINE_DIR));
    assert!(quarantined.exists());
    assert!(!path.exists());

    assert!(m.get_wal_path(3).unwrap_err().is_not_found());
    assert!(m.get_wal_status(2, 3).unwrap_err().is_not_found());
    assert_eq!(m.wal_table_size(2).unwrap(), 0);
    let metrics = m.metrics();
    assert_eq!(metrics.replay_retried, 1);
    assert_eq!(metrics.replay_failed, 1);
    m.stop();
}

#[test]
fn test_permanent_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    executor.script(3, vec![Err(ReplayError::permanent("table dropped"))]);
    let m = start(config(dir.path()), executor.clone());

    let path = write_and_recover(&m, 1, 2, 3);
    let other = write_and_recover(&m, 1, 2, 4);
    assert!(wait_until(Duration::from_secs(10), || m
        .failed_wals(2)
        .unwrap()
        .len()
        == 1
        && m.metrics().replay_succeeded == 1));

    assert_eq!(m.failed_wals(2).unwrap()[0].attempts, 1);
    assert_eq!(executor.calls_for(3), 1);
    assert_eq!(m.metrics().replay_retried, 0);
    assert!(quarantine_path(dir.path(), 1, 2, &path).exists());
    // one bad WAL does not hold up the rest of its table
    assert!(!other.exists());
    m.stop();
}

#[test]
fn test_panicking_executor_fails_wal_permanently() {
    let dir = TempDir::new().unwrap();
    let m = start(config(dir.path()), Arc::new(PanickingExecutor));

    let path = write_and_recover(&m, 1, 2, 3);
    assert!(wait_until(Duration::from_secs(10), || m
        .failed_wals(2)
        .unwrap()
        .len()
        == 1));
    assert!(m.wait_replay_idle(Duration::from_secs(5)));

    let failed = m.failed_wals(2).unwrap();
    assert_eq!(failed[0].attempts, 1);
    assert!(failed[0].reason.contains("executor bug"));
    assert_eq!(m.wal_table_size(2).unwrap(), 0);
    assert!(m.get_wal_path(3).unwrap_err().is_not_found());
    assert!(m.get_wal_status(2, 3).unwrap_err().is_not_found());
    assert!(quarantine_path(dir.path(), 1, 2, &path).exists());
    assert_eq!(m.metrics().replay_failed, 1);
    m.stop();
}

#[test]
fn test_replayed_wal_stays_tracked_until_deleted() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(UndeletableExecutor::default());
    let mut config = config(dir.path());
    config.replay_backoff_base_ms = 20;
    config.replay_backoff_max_ms = 20;
    let m = start(config, executor.clone());

    let path = write_and_recover(&m, 1, 2, 3);
    assert!(wait_until(Duration::from_secs(10), || executor
        .calls
        .load(Ordering::SeqCst)
        == 1));
    thread::sleep(Duration::from_millis(150));

    assert!(path.is_dir());
    assert_eq!(m.metrics().replay_succeeded, 0);
    assert_eq!(m.get_wal_path(3).unwrap(), path);
    assert_eq!(m.wal_table_size(2).unwrap(), 1);
    assert!(m.failed_wals(2).unwrap().is_empty());

    fs::remove_dir(&path).unwrap();
    assert!(wait_until(Duration::from_secs(10), || m.metrics().replay_succeeded == 1));
    assert!(m.get_wal_path(3).unwrap_err().is_not_found());
    assert!(m.get_wal_status(2, 3).unwrap_err().is_not_found());
    assert_eq!(m.wal_table_size(2).unwrap(), 0);
    // the executor never sees the WAL a second time
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    m.stop();
}

#[test]
fn test_incomplete_wal_is_sealed_before_replay() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let m = start(config(dir.path()), executor.clone());

    let path = m.create_wal_path(1, 2, 3, "load").unwrap();
    let mut writer = m.create_wal_writer(3).unwrap();
    writer.append_block(b"half").unwrap();
    writer.sync().unwrap();
    let prepare = aerowal::wal::prepare_path_for(writer.path());
    drop(writer);
    assert!(prepare.exists());

    m.add_recover_wal(1, 2, 3, &prepare).unwrap();
    assert_eq!(m.get_wal_path(3).unwrap(), path);
    assert!(wait_until(Duration::from_secs(10), || m.metrics().replay_succeeded == 1));

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].file_existed);
    assert!(!prepare.exists());
    assert!(!path.exists());
    m.stop();
}

#[test]
fn test_stop_drains_accepted_replays() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::slow(Duration::from_millis(30)));
    let m = start(config(dir.path()), executor.clone());

    for wal_id in 0..6 {
        write_and_recover(&m, 1, wal_id % 3, wal_id);
    }
    assert!(wait_until(Duration::from_secs(10), || m.metrics().replay_submitted == 6));

    m.stop();
    assert!(!m.is_running());
    assert_eq!(executor.finished.load(Ordering::SeqCst), 6);
    assert_eq!(m.metrics().replay_succeeded, 6);
    assert!(m.registered_wals().unwrap().is_empty());
}

#[test]
fn test_drive_replay_once_requires_running_manager() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let m = WalManager::with_sampler(
        config(dir.path()),
        executor.clone(),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    assert!(m.drive_replay_once().is_err());

    m.init().unwrap();
    assert_eq!(m.drive_replay_once().unwrap(), 0);
    m.stop();
    assert!(m.drive_replay_once().is_err());
}

#[test]
fn test_drop_wal_table_forgets_failures() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::with_fallback(Err(ReplayError::permanent(
        "corrupt",
    ))));
    let m = start(config(dir.path()), executor);

    write_and_recover(&m, 1, 5, 50);
    assert!(wait_until(Duration::from_secs(10), || m
        .failed_wals(5)
        .unwrap()
        .len()
        == 1));
    assert!(m.drop_wal_table(5).unwrap());
    assert!(m.failed_wals(5).unwrap().is_empty());
    assert!(!m.drop_wal_table(5).unwrap());
    m.stop();
}
