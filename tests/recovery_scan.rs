//! Startup recovery: leftover WALs are registered and queued for replay
//!
//! The executor is held closed by a gate so the state right after `init`
//! can be observed before any replay finishes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use aerowal::registry::{wal_path, WalFileName};
use aerowal::{
    ReplayError, ReplayExecutor, StaticUsageSampler, StatusQueueRequest, WalDirConfig, WalEntry,
    WalManager, WalManagerConfig, WalStatus,
};
use tempfile::TempDir;

/// Blocks every replay until opened, then succeeds.
#[derive(Default)]
struct GateExecutor {
    open: Mutex<bool>,
    cv: Condvar,
    replayed: Mutex<Vec<i64>>,
}

impl GateExecutor {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl ReplayExecutor for GateExecutor {
    fn replay(&self, entry: &WalEntry, _: Option<&[usize]>) -> Result<(), ReplayError> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
        drop(open);
        assert!(entry.path.exists(), "replayed before sealing: {}", entry.path.display());
        self.replayed.lock().unwrap().push(entry.wal_id);
        Ok(())
    }
}

fn config(dir: &Path) -> WalManagerConfig {
    let mut config = WalManagerConfig::with_dirs(vec![WalDirConfig::with_limit(dir, 1 << 20)]);
    config.replay_threads = 1;
    config.replay_queue_size = 1;
    config.replay_batch_size = 1;
    config.replay_interval_ms = 20;
    config.dir_info_update_interval_ms = 20;
    config
}

fn leave_wal(dir: &Path, db_id: i64, table_id: i64, wal_id: i64, finished: bool) -> PathBuf {
    let path = wal_path(dir, db_id, table_id, &WalFileName::new(0, wal_id, "left"));
    let mut writer = aerowal::wal::WalWriter::create(&path, &[0, 1]).unwrap();
    writer.append_block(b"payload").unwrap();
    if finished {
        writer.finish().unwrap()
    } else {
        writer.sync().unwrap();
        aerowal::wal::prepare_path_for(&path)
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_init_registers_every_leftover_wal() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    leave_wal(root, 1, 1, 11, true);
    leave_wal(root, 1, 2, 21, true);
    leave_wal(root, 1, 2, 22, true);
    let incomplete = leave_wal(root, 1, 99, 991, false);

    // quarantined files and strays are not WALs to recover
    fs::create_dir_all(root.join("tmp")).unwrap();
    fs::write(root.join("tmp").join("1_2_1_0_5_old"), b"x").unwrap();
    fs::write(root.join("1").join("2").join("README"), b"x").unwrap();

    let executor = Arc::new(GateExecutor::default());
    let m = WalManager::with_sampler(
        config(root),
        executor.clone(),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    m.init().unwrap();
    assert!(m.is_running());

    let ids: Vec<i64> = m.registered_wals().unwrap().iter().map(|e| e.wal_id).collect();
    assert_eq!(ids, vec![11, 21, 22, 991]);
    assert_eq!(m.metrics().wals_recovered, 4);
    assert!(m.get_wal_path(5).unwrap_err().is_not_found());

    assert_eq!(m.wal_table_size(1).unwrap(), 1);
    assert_eq!(m.wal_table_size(2).unwrap(), 2);
    assert_eq!(m.wal_table_size(99).unwrap(), 1);

    // the pool is saturated by earlier tables, so table 99 is never handed out
    assert_eq!(m.get_wal_status(99, 991).unwrap(), WalStatus::Prepare);
    assert!(incomplete.exists());
    assert_eq!(
        m.get_wal_path(991).unwrap(),
        root.join("1").join("99").join("1_0_991_left")
    );
    for (table, wal) in [(1, 11), (2, 21), (2, 22)] {
        let status = m.get_wal_status(table, wal).unwrap();
        assert!(status >= WalStatus::Create, "wal {} is {}", wal, status);
    }
    let sizes = m.query_status_queue_sizes(&StatusQueueRequest::all()).unwrap();
    assert_eq!(sizes.total, 4);

    executor.open();
    assert!(wait_until(Duration::from_secs(10), || m
        .registered_wals()
        .unwrap()
        .is_empty()));
    assert!(m.wait_replay_idle(Duration::from_secs(5)));

    let mut replayed = executor.replayed.lock().unwrap().clone();
    replayed.sort();
    assert_eq!(replayed, vec![11, 21, 22, 991]);
    assert!(!incomplete.exists());
    assert!(!root.join("1").join("99").join("1_0_991_left").exists());
    assert!(root.join("tmp").join("1_2_1_0_5_old").exists());
    assert_eq!(
        m.query_status_queue_sizes(&StatusQueueRequest::all()).unwrap().total,
        0
    );
    m.stop();
}

#[test]
fn test_init_creates_quarantine_dir() {
    let dir = TempDir::new().unwrap();
    let m = WalManager::with_sampler(
        config(dir.path()),
        Arc::new(GateExecutor::default()),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    m.init().unwrap();
    assert!(dir.path().join("tmp").is_dir());
    assert!(m.registered_wals().unwrap().is_empty());
    m.stop();
    assert!(!m.is_running());
}

#[test]
fn test_init_twice_is_rejected() {
    let dir = TempDir::new().unwrap();
    let m = WalManager::with_sampler(
        config(dir.path()),
        Arc::new(GateExecutor::default()),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    m.init().unwrap();
    assert!(m.init().is_err());
    m.stop();
    m.stop();
    assert!(m.init().is_err());
}

#[test]
fn test_runtime_add_recover_wal_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let executor = Arc::new(GateExecutor::default());
    let m = WalManager::with_sampler(
        config(root),
        executor.clone(),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    m.init().unwrap();

    let path = leave_wal(root, 3, 4, 5, true);
    m.add_recover_wal(3, 4, 5, &path).unwrap();
    m.add_recover_wal(3, 4, 5, &path).unwrap();
    assert_eq!(m.wal_table_size(4).unwrap(), 1);
    assert_eq!(m.metrics().wals_recovered, 1);

    let other = root.join("3").join("4").join("1_0_5_elsewhere");
    assert!(matches!(
        m.add_recover_wal(3, 4, 5, &other),
        Err(aerowal::WalManagerError::AlreadyExists(5))
    ));

    executor.open();
    assert!(wait_until(Duration::from_secs(10), || !path.exists()));
    m.stop();
}

#[test]
fn test_writer_that_gave_up_hands_wal_to_replay() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(GateExecutor::default());
    executor.open();
    let m = WalManager::with_sampler(
        config(dir.path()),
        executor.clone(),
        Arc::new(StaticUsageSampler::new()),
    )
    .unwrap();
    m.init().unwrap();

    let path = m.create_wal_path(7, 8, 9, "load").unwrap();
    let mut writer = m.create_wal_writer(9).unwrap();
    writer.append_block(b"rows").unwrap();
    writer.finish().unwrap();
    m.set_wal_status(8, 9, WalStatus::Create).unwrap();

    m.add_recover_wal(7, 8, 9, &path).unwrap();
    assert!(wait_until(Duration::from_secs(10), || m
        .get_wal_path(9)
        .is_err()));
    assert_eq!(executor.replayed.lock().unwrap().as_slice(), &[9]);
    assert!(!path.exists());
    m.stop();
}
