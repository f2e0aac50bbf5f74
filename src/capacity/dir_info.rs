//! Per-directory quota bookkeeping

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

/// Quota, usage and reservation counters for one WAL directory.
///
/// Each directory has its own lock, so writers reserving space in
/// different directories never contend.
#[derive(Debug)]
pub struct WalDirInfo {
    path: PathBuf,
    auto_limit: bool,
    failure_threshold: u32,
    usage: Mutex<DirUsage>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DirUsage {
    limit: u64,
    used: u64,
    pre_allocated: u64,
    io_failures: u32,
}

/// Result of a pre-allocation adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreallocationChange {
    pub before: u64,
    pub after: u64,
    /// Set when the decrease exceeded the reservation and was clamped to zero.
    pub clamped: bool,
}

impl WalDirInfo {
    /// `limit_bytes == 0` marks the quota as derived from free space.
    pub fn new(path: impl Into<PathBuf>, limit_bytes: u64, failure_threshold: u32) -> Self {
        Self {
            path: path.into(),
            auto_limit: limit_bytes == 0,
            failure_threshold,
            usage: Mutex::new(DirUsage {
                limit: limit_bytes,
                ..DirUsage::default()
            }),
        }
    }

    // The guarded value is plain counters, consistent even if a holder panicked.
    fn usage(&self) -> MutexGuard<'_, DirUsage> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the quota tracks filesystem free space.
    pub fn is_auto_limit(&self) -> bool {
        self.auto_limit
    }

    pub fn limit(&self) -> u64 {
        self.usage().limit
    }

    pub fn used(&self) -> u64 {
        self.usage().used
    }

    pub fn pre_allocated(&self) -> u64 {
        self.usage().pre_allocated
    }

    pub fn set_limit(&self, limit: u64) {
        self.usage().limit = limit;
    }

    /// Record a fresh usage sample. A successful sample clears the I/O failure streak.
    pub fn set_used(&self, used: u64) {
        let mut usage = self.usage();
        usage.used = used;
        usage.io_failures = 0;
    }

    /// Apply `increase - decrease` to the reservation, never going below zero.
    pub fn adjust_pre_allocated(&self, increase: u64, decrease: u64) -> PreallocationChange {
        let mut usage = self.usage();
        let before = usage.pre_allocated;
        let grown = before.saturating_add(increase);
        let clamped = decrease > grown;
        usage.pre_allocated = grown.saturating_sub(decrease);
        PreallocationChange {
            before,
            after: usage.pre_allocated,
            clamped,
        }
    }

    /// Count one I/O failure. Returns the current streak length.
    pub fn record_io_failure(&self) -> u32 {
        let mut usage = self.usage();
        usage.io_failures = usage.io_failures.saturating_add(1);
        usage.io_failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn io_failures(&self) -> u32 {
        self.usage().io_failures
    }

    /// A degraded directory accepts no new WALs until a sample succeeds.
    pub fn is_degraded(&self) -> bool {
        self.usage().io_failures >= self.failure_threshold
    }

    /// `max(0, limit - used - pre_allocated)`, or 0 while degraded.
    pub fn available(&self) -> u64 {
        let usage = self.usage();
        if usage.io_failures >= self.failure_threshold {
            return 0;
        }
        usage
            .limit
            .saturating_sub(usage.used)
            .saturating_sub(usage.pre_allocated)
    }

    pub fn snapshot(&self) -> WalDirSnapshot {
        let usage = *self.usage();
        let degraded = usage.io_failures >= self.failure_threshold;
        WalDirSnapshot {
            path: self.path.clone(),
            limit: usage.limit,
            used: usage.used,
            pre_allocated: usage.pre_allocated,
            available: if degraded {
                0
            } else {
                usage.limit.saturating_sub(usage.used).saturating_sub(usage.pre_allocated)
            },
            auto_limit: self.auto_limit,
            degraded,
        }
    }
}

/// Point-in-time view of one directory, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalDirSnapshot {
    pub path: PathBuf,
    pub limit: u64,
    pub used: u64,
    pub pre_allocated: u64,
    pub available: u64,
    pub auto_limit: bool,
    pub degraded: bool,
}
