//! Per-table replay queue
//!
//! FIFO by registration order. A WAL is either queued, handed out (in
//! `replaying`), or reported in `failed`; never two at once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::executor::{ReplayError, ReplayExecutor};
use crate::registry::WalEntry;

/// A WAL waiting in (or taken from) a table queue.
#[derive(Debug, Clone)]
pub struct QueuedWal {
    pub entry: WalEntry,
    /// Failed attempts so far
    pub attempts: u32,
    /// Executor already succeeded; only the delete is outstanding
    pub replayed: bool,
    pub delete_attempts: u32,
    ready_at: Instant,
}

impl QueuedWal {
    fn new(entry: WalEntry) -> Self {
        Self {
            entry,
            attempts: 0,
            replayed: false,
            delete_attempts: 0,
            ready_at: Instant::now(),
        }
    }

    pub fn wal_id(&self) -> i64 {
        self.entry.wal_id
    }
}

/// A WAL that exhausted its retries or failed permanently.
#[derive(Debug, Clone, Serialize)]
pub struct FailedWal {
    pub entry: WalEntry,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TableState {
    queue: VecDeque<QueuedWal>,
    replaying: HashSet<i64>,
    failed: Vec<FailedWal>,
}

/// Replay state of one table, shared between the table map and the
/// replay tasks working on it.
pub struct WalTable {
    table_id: i64,
    executor: Arc<dyn ReplayExecutor>,
    state: Mutex<TableState>,
}

impl WalTable {
    pub fn new(table_id: i64, executor: Arc<dyn ReplayExecutor>) -> Self {
        Self {
            table_id,
            executor,
            state: Mutex::new(TableState::default()),
        }
    }

    pub fn table_id(&self) -> i64 {
        self.table_id
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a WAL for replay. Returns false if it is already queued or replaying.
    pub fn enqueue(&self, entry: WalEntry) -> bool {
        let mut state = self.state();
        let wal_id = entry.wal_id;
        if state.replaying.contains(&wal_id) || state.queue.iter().any(|q| q.wal_id() == wal_id) {
            return false;
        }
        state.queue.push_back(QueuedWal::new(entry));
        true
    }

    /// Take up to `max` WALs whose backoff has elapsed, oldest first.
    pub fn next_replay_batch(&self, max: usize, now: Instant) -> Vec<QueuedWal> {
        let mut state = self.state();
        let mut batch = Vec::new();
        let mut kept = VecDeque::with_capacity(state.queue.len());
        while let Some(wal) = state.queue.pop_front() {
            if batch.len() < max && wal.ready_at <= now {
                batch.push(wal);
            } else {
                kept.push_back(wal);
            }
        }
        state.queue = kept;
        for wal in &batch {
            state.replaying.insert(wal.wal_id());
        }
        batch
    }

    /// Put back a WAL the pool could not accept, ahead of everything else.
    pub fn return_unsubmitted(&self, wal: QueuedWal) {
        let mut state = self.state();
        state.replaying.remove(&wal.wal_id());
        state.queue.push_front(wal);
    }

    /// Queue a failed WAL again once `delay` has elapsed.
    pub fn requeue(&self, mut wal: QueuedWal, delay: Duration) {
        let mut state = self.state();
        state.replaying.remove(&wal.wal_id());
        wal.ready_at = Instant::now() + delay;
        state.queue.push_back(wal);
    }

    /// Replay finished; forget the WAL.
    pub fn finish(&self, wal_id: i64) {
        self.state().replaying.remove(&wal_id);
    }

    pub fn mark_failed(&self, wal: QueuedWal, reason: impl Into<String>) {
        let mut state = self.state();
        state.replaying.remove(&wal.wal_id());
        state.failed.push(FailedWal {
            entry: wal.entry,
            attempts: wal.attempts,
            reason: reason.into(),
            failed_at: Utc::now(),
        });
    }

    /// Queued plus in-flight WALs.
    pub fn size(&self) -> usize {
        let state = self.state();
        state.queue.len() + state.replaying.len()
    }

    /// WALs handed out and not yet finished, requeued or failed.
    pub fn in_progress(&self) -> usize {
        self.state().replaying.len()
    }

    pub fn contains(&self, wal_id: i64) -> bool {
        let state = self.state();
        state.replaying.contains(&wal_id) || state.queue.iter().any(|q| q.wal_id() == wal_id)
    }

    pub fn failed(&self) -> Vec<FailedWal> {
        self.state().failed.clone()
    }

    /// Time until the earliest queued WAL becomes ready. `None` if nothing is queued.
    pub fn next_ready_in(&self, now: Instant) -> Option<Duration> {
        self.state()
            .queue
            .iter()
            .map(|q| q.ready_at.saturating_duration_since(now))
            .min()
    }

    /// Run the executor for one WAL. No table lock is held while it runs.
    pub fn replay(&self, entry: &WalEntry, columns: Option<&[usize]>) -> Result<(), ReplayError> {
        self.executor.replay(entry, columns)
    }
}
