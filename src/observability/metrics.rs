//! Counters for the WAL manager
//!
//! - Counters only, monotonic increase
//! - Reset only on process start
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one WAL manager instance.
///
/// Relaxed ordering everywhere: readers only need eventually exact totals.
#[derive(Debug, Default)]
pub struct WalMetrics {
    paths_created: AtomicU64,
    wals_deleted: AtomicU64,
    wals_recovered: AtomicU64,
    admissions_rejected: AtomicU64,
    preallocation_clamps: AtomicU64,
    sampler_failures: AtomicU64,
    replay_submitted: AtomicU64,
    replay_succeeded: AtomicU64,
    replay_retried: AtomicU64,
    replay_failed: AtomicU64,
}

impl WalMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_paths_created(&self) {
        self.paths_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_wals_deleted(&self) {
        self.wals_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_wals_recovered(&self) {
        self.wals_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_admissions_rejected(&self) {
        self.admissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_preallocation_clamps(&self) {
        self.preallocation_clamps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sampler_failures(&self) {
        self.sampler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replay_submitted(&self) {
        self.replay_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replay_succeeded(&self) {
        self.replay_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replay_retried(&self) {
        self.replay_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replay_failed(&self) {
        self.replay_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> WalMetricsSnapshot {
        WalMetricsSnapshot {
            paths_created: self.paths_created.load(Ordering::Relaxed),
            wals_deleted: self.wals_deleted.load(Ordering::Relaxed),
            wals_recovered: self.wals_recovered.load(Ordering::Relaxed),
            admissions_rejected: self.admissions_rejected.load(Ordering::Relaxed),
            preallocation_clamps: self.preallocation_clamps.load(Ordering::Relaxed),
            sampler_failures: self.sampler_failures.load(Ordering::Relaxed),
            replay_submitted: self.replay_submitted.load(Ordering::Relaxed),
            replay_succeeded: self.replay_succeeded.load(Ordering::Relaxed),
            replay_retried: self.replay_retried.load(Ordering::Relaxed),
            replay_failed: self.replay_failed.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WalMetricsSnapshot {
    pub paths_created: u64,
    pub wals_deleted: u64,
    pub wals_recovered: u64,
    pub admissions_rejected: u64,
    pub preallocation_clamps: u64,
    pub sampler_failures: u64,
    pub replay_submitted: u64,
    pub replay_succeeded: u64,
    pub replay_retried: u64,
    pub replay_failed: u64,
}
