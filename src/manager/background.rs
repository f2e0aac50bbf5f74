//! Background work: the usage sampler, the replay driver and the replay
//! task body run on pool threads.
//!
//! Task-level failures are logged and turned into requeues or quarantine;
//! nothing here returns an error to a loop, so one bad WAL never stalls the
//! others.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Shared, WalManagerError, WalManagerResult};
use crate::ledger::WalStatus;
use crate::observability::{log_event_at, log_event_with_fields, Event, Severity};
use crate::registry::{quarantine_path, WalEntry};
use crate::replay::{QueuedWal, ReplayPool, WalTable};
use crate::wal::prepare_path_for;

/// Delay before the driver retries after the pool refused work.
const POOL_FULL_BACKOFF: Duration = Duration::from_millis(100);

/// One WAL handed to the replay pool, with the table it belongs to.
pub(super) struct ReplayJob {
    table: Arc<WalTable>,
    wal: QueuedWal,
}

/// What one driver pass did.
pub(super) struct DriveOutcome {
    pub submitted: usize,
    pool_full: bool,
    next_ready: Option<Duration>,
}

impl DriveOutcome {
    /// How long the driver may sleep before the next pass.
    fn next_wait(&self, interval: Duration) -> Duration {
        if self.pool_full {
            return POOL_FULL_BACKOFF.min(interval);
        }
        self.next_ready.map_or(interval, |d| d.min(interval))
    }
}

impl Shared {
    pub(super) fn sampler_loop(&self) {
        let interval = self.config.dir_info_update_interval();
        while !self.sampler_signal.wait(interval) {
            self.capacity.refresh_all();
        }
    }

    pub(super) fn driver_loop(&self, pool: &ReplayPool<ReplayJob>) {
        let interval = self.config.replay_interval();
        loop {
            if self.replay_signal.is_stopped() {
                break;
            }
            let wait = match self.drive_once(pool) {
                Ok(outcome) => outcome.next_wait(interval),
                Err(e) => {
                    log_event_at(
                        Severity::Error,
                        Event::ReplaySubmitted,
                        &[("code", e.code()), ("error", &e.to_string())],
                    );
                    interval
                }
            };
            if self.replay_signal.wait(wait) {
                break;
            }
        }
    }

    /// Take the next batch from every table and hand it to the pool.
    ///
    /// A WAL the pool refuses goes back to the head of its table queue
    /// without counting as an attempt, and the pass ends there.
    pub(super) fn drive_once(&self, pool: &ReplayPool<ReplayJob>) -> WalManagerResult<DriveOutcome> {
        let now = Instant::now();
        let mut outcome = DriveOutcome {
            submitted: 0,
            pool_full: false,
            next_ready: None,
        };

        let tables = self.tables.all()?;
        'tables: for table in &tables {
            let mut batch = table
                .next_replay_batch(self.config.replay_batch_size, now)
                .into_iter();
            while let Some(wal) = batch.next() {
                let wal_id = wal.wal_id();
                let job = ReplayJob {
                    table: Arc::clone(table),
                    wal,
                };
                match pool.try_submit(job) {
                    Ok(()) => {
                        outcome.submitted += 1;
                        self.metrics.increment_replay_submitted();
                        log_event_at(
                            Severity::Trace,
                            Event::ReplaySubmitted,
                            &[
                                ("wal_id", &wal_id.to_string()),
                                ("table_id", &table.table_id().to_string()),
                            ],
                        );
                    }
                    Err((job, _)) => {
                        let unsent: Vec<QueuedWal> =
                            std::iter::once(job.wal).chain(batch).collect();
                        for wal in unsent.into_iter().rev() {
                            table.return_unsubmitted(wal);
                        }
                        outcome.pool_full = true;
                        break 'tables;
                    }
                }
            }
        }

        let later = Instant::now();
        outcome.next_ready = tables.iter().filter_map(|t| t.next_ready_in(later)).min();
        Ok(outcome)
    }

    /// True when nothing is replaying and nothing is ready to replay.
    pub(super) fn replay_idle(&self) -> bool {
        let tables = match self.tables.all() {
            Ok(tables) => tables,
            Err(_) => return false,
        };
        let now = Instant::now();
        tables.iter().all(|t| {
            t.in_progress() == 0 && t.next_ready_in(now).map_or(true, |d| !d.is_zero())
        })
    }

    /// Body of one replay task.
    pub(super) fn run_replay(&self, job: ReplayJob) {
        let ReplayJob { table, wal } = job;
        if wal.replayed {
            self.on_replay_succeeded(&table, wal);
            return;
        }
        let entry = wal.entry.clone();

        if let Err(e) = self.seal(&entry) {
            self.on_replay_failed(&table, wal, e.to_string(), false);
            return;
        }

        self.record_status(entry.table_id, entry.wal_id, WalStatus::Create);
        self.record_status(entry.table_id, entry.wal_id, WalStatus::Replay);

        let columns = self.columns.get(entry.wal_id).ok();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            table.replay(&entry, columns.as_deref())
        }));
        match result {
            Ok(Ok(())) => self.on_replay_succeeded(&table, wal),
            Ok(Err(e)) => {
                let permanent = e.is_permanent();
                self.on_replay_failed(&table, wal, e.message().to_string(), permanent);
            }
            Err(payload) => {
                let reason = format!("replay executor panicked: {}", panic_message(&*payload));
                self.on_replay_failed(&table, wal, reason, true);
            }
        }
    }

    /// Give an incomplete WAL its final name before replay.
    fn seal(&self, entry: &WalEntry) -> WalManagerResult<()> {
        let prepare = prepare_path_for(&entry.path);
        if entry.path.exists() || !prepare.exists() {
            return Ok(());
        }
        fs::rename(&prepare, &entry.path)
            .map_err(|e| WalManagerError::io(&prepare, "seal incomplete wal", e))?;
        log_event_with_fields(
            Event::WalSealed,
            &[
                ("wal_id", &entry.wal_id.to_string()),
                ("path", &entry.path.display().to_string()),
            ],
        );
        Ok(())
    }

    /// Delete a replayed WAL. Until the delete succeeds the WAL stays
    /// registered and queued, and is never handed to the executor again.
    fn on_replay_succeeded(&self, table: &WalTable, mut wal: QueuedWal) {
        let wal_id = wal.wal_id();
        let table_id = wal.entry.table_id;

        if let Err(e) = self.delete_wal(wal_id, 0) {
            wal.replayed = true;
            wal.delete_attempts += 1;
            let delay = self.retry.delay(wal.delete_attempts);
            log_event_at(
                Severity::Error,
                Event::WalDeleted,
                &[
                    ("wal_id", &wal_id.to_string()),
                    ("code", e.code()),
                    ("attempts", &wal.delete_attempts.to_string()),
                    ("delay_ms", &delay.as_millis().to_string()),
                    ("error", &e.to_string()),
                ],
            );
            table.requeue(wal, delay);
            self.replay_signal.wake();
            return;
        }
        table.finish(wal_id);

        self.metrics.increment_replay_succeeded();
        log_event_with_fields(
            Event::ReplaySucceeded,
            &[("wal_id", &wal_id.to_string()), ("table_id", &table_id.to_string())],
        );
    }

    fn on_replay_failed(&self, table: &WalTable, mut wal: QueuedWal, reason: String, permanent: bool) {
        wal.attempts += 1;
        let wal_id = wal.wal_id();
        let table_id = wal.entry.table_id;

        if !permanent && self.retry.should_retry(wal.attempts) {
            let delay = self.retry.delay(wal.attempts);
            self.record_status(table_id, wal_id, WalStatus::Create);
            self.metrics.increment_replay_retried();
            log_event_at(
                Severity::Warn,
                Event::ReplayRetry,
                &[
                    ("wal_id", &wal_id.to_string()),
                    ("table_id", &table_id.to_string()),
                    ("attempts", &wal.attempts.to_string()),
                    ("delay_ms", &delay.as_millis().to_string()),
                    ("reason", &reason),
                ],
            );
            table.requeue(wal, delay);
            self.replay_signal.wake();
            return;
        }

        self.quarantine(&wal.entry);
        if let Err(e) = self.registry.remove(wal_id) {
            log_event_at(
                Severity::Error,
                Event::ReplayFailed,
                &[("wal_id", &wal_id.to_string()), ("error", &e.to_string())],
            );
        }
        self.forget_metadata(table_id, wal_id);

        self.metrics.increment_replay_failed();
        let err = WalManagerError::ReplayFailed {
            wal_id,
            reason: reason.clone(),
        };
        log_event_at(
            Severity::Error,
            Event::ReplayFailed,
            &[
                ("code", err.code()),
                ("table_id", &table_id.to_string()),
                ("attempts", &wal.attempts.to_string()),
                ("permanent", &permanent.to_string()),
                ("error", &err.to_string()),
            ],
        );
        table.mark_failed(wal, reason);
    }

    /// Move a failed WAL into its directory's quarantine for inspection.
    fn quarantine(&self, entry: &WalEntry) {
        let dir = match self.capacity.dir_for_path(&entry.path) {
            Some(dir) => dir,
            None => {
                log_event_at(
                    Severity::Warn,
                    Event::WalQuarantined,
                    &[
                        ("path", &entry.path.display().to_string()),
                        ("error", "outside every wal dir, left in place"),
                    ],
                );
                return;
            }
        };

        let source = if entry.path.exists() {
            entry.path.clone()
        } else {
            prepare_path_for(&entry.path)
        };
        let target = quarantine_path(dir.path(), entry.db_id, entry.table_id, &source);
        let moved = match target.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|()| fs::rename(&source, &target));

        match moved {
            Ok(()) => log_event_with_fields(
                Event::WalQuarantined,
                &[
                    ("wal_id", &entry.wal_id.to_string()),
                    ("from", &source.display().to_string()),
                    ("to", &target.display().to_string()),
                ],
            ),
            Err(e) => {
                self.capacity.record_io_failure(dir);
                log_event_at(
                    Severity::Warn,
                    Event::WalQuarantined,
                    &[
                        ("wal_id", &entry.wal_id.to_string()),
                        ("path", &source.display().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
