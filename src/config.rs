//! WAL manager configuration
//!
//! Loaded from a JSON file. Every field except `wal_dirs` has a default.
//!
//! ```json
//! {
//!   "wal_dirs": [
//!     { "path": "/data1/wal" },
//!     { "path": "/data2/wal", "limit_bytes": 10737418240 }
//!   ],
//!   "disk_limit_percent": 10,
//!   "replay_threads": 4
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::{WalManagerError, WalManagerResult};

/// One configured WAL directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalDirConfig {
    pub path: PathBuf,

    /// Byte quota. 0 means "derive from filesystem free space".
    #[serde(default)]
    pub limit_bytes: u64,
}

impl WalDirConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit_bytes: 0,
        }
    }

    pub fn with_limit(path: impl Into<PathBuf>, limit_bytes: u64) -> Self {
        Self {
            path: path.into(),
            limit_bytes,
        }
    }
}

/// Configuration for `WalManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalManagerConfig {
    pub wal_dirs: Vec<WalDirConfig>,

    /// Share of (free + used) space a directory may use when its quota is derived
    #[serde(default = "default_disk_limit_percent")]
    pub disk_limit_percent: u8,

    /// Node id embedded in WAL file names
    #[serde(default)]
    pub backend_id: i64,

    #[serde(default = "default_dir_info_update_interval_ms")]
    pub dir_info_update_interval_ms: u64,

    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,

    #[serde(default = "default_replay_threads")]
    pub replay_threads: usize,

    #[serde(default = "default_replay_queue_size")]
    pub replay_queue_size: usize,

    /// Max entries taken from one table per driver pass
    #[serde(default = "default_replay_batch_size")]
    pub replay_batch_size: usize,

    /// Attempts before a WAL is quarantined
    #[serde(default = "default_replay_retry_ceiling")]
    pub replay_retry_ceiling: u32,

    #[serde(default = "default_replay_backoff_base_ms")]
    pub replay_backoff_base_ms: u64,

    #[serde(default = "default_replay_backoff_max_ms")]
    pub replay_backoff_max_ms: u64,

    #[serde(default)]
    pub replay_backoff_jitter_ms: u64,

    /// Consecutive I/O failures before a directory reports zero availability
    #[serde(default = "default_dir_io_failure_threshold")]
    pub dir_io_failure_threshold: u32,
}

fn default_disk_limit_percent() -> u8 {
    10
}
fn default_dir_info_update_interval_ms() -> u64 {
    5_000
}
fn default_replay_interval_ms() -> u64 {
    5_000
}
fn default_replay_threads() -> usize {
    4
}
fn default_replay_queue_size() -> usize {
    1024
}
fn default_replay_batch_size() -> usize {
    16
}
fn default_replay_retry_ceiling() -> u32 {
    10
}
fn default_replay_backoff_base_ms() -> u64 {
    5_000
}
fn default_replay_backoff_max_ms() -> u64 {
    1_800_000
} // 30 minutes
fn default_dir_io_failure_threshold() -> u32 {
    3
}

impl WalManagerConfig {
    /// Config with defaults for the given directories (quota from free space).
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::with_dirs(dirs.into_iter().map(WalDirConfig::new).collect())
    }

    pub fn with_dirs(wal_dirs: Vec<WalDirConfig>) -> Self {
        Self {
            wal_dirs,
            disk_limit_percent: default_disk_limit_percent(),
            backend_id: 0,
            dir_info_update_interval_ms: default_dir_info_update_interval_ms(),
            replay_interval_ms: default_replay_interval_ms(),
            replay_threads: default_replay_threads(),
            replay_queue_size: default_replay_queue_size(),
            replay_batch_size: default_replay_batch_size(),
            replay_retry_ceiling: default_replay_retry_ceiling(),
            replay_backoff_base_ms: default_replay_backoff_base_ms(),
            replay_backoff_max_ms: default_replay_backoff_max_ms(),
            replay_backoff_jitter_ms: 0,
            dir_io_failure_threshold: default_dir_io_failure_threshold(),
        }
    }

    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> WalManagerResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            WalManagerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            WalManagerError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> WalManagerResult<()> {
        if self.wal_dirs.is_empty() {
            return Err(WalManagerError::Config("wal_dirs is empty".into()));
        }
        if self.disk_limit_percent == 0 || self.disk_limit_percent > 100 {
            return Err(WalManagerError::Config(format!(
                "disk_limit_percent must be in 1..=100, got {}",
                self.disk_limit_percent
            )));
        }
        if self.replay_threads == 0 || self.replay_queue_size == 0 || self.replay_batch_size == 0 {
            return Err(WalManagerError::Config(
                "replay_threads, replay_queue_size and replay_batch_size must be non-zero".into(),
            ));
        }
        if self.replay_retry_ceiling == 0 {
            return Err(WalManagerError::Config("replay_retry_ceiling must be non-zero".into()));
        }
        if self.dir_io_failure_threshold == 0 {
            return Err(WalManagerError::Config("dir_io_failure_threshold must be non-zero".into()));
        }
        Ok(())
    }

    pub fn dir_info_update_interval(&self) -> Duration {
        Duration::from_millis(self.dir_info_update_interval_ms)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}
