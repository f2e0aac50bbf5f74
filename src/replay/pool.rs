//! Bounded replay worker pool
//!
//! Fixed set of threads pulling jobs from a bounded channel. Submission
//! never blocks: a full queue hands the job back to the caller. Shutdown
//! closes the channel and lets the workers drain whatever was accepted.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::observability::Logger;

/// Why a job was handed back by `try_submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRejection {
    Full,
    Closed,
}

/// Jobs accepted but not yet finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct ReplayPool<T: Send + 'static> {
    sender: Mutex<Option<Sender<T>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<InFlight>,
}

impl<T: Send + 'static> ReplayPool<T> {
    /// Start `threads` workers, each running `handler` on the jobs it receives.
    pub fn start<F>(name: &str, threads: usize, queue_size: usize, handler: F) -> std::io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded::<T>(queue_size);
        let handler = Arc::new(handler);
        let in_flight = Arc::new(InFlight::default());

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver: Receiver<T> = receiver.clone();
            let handler = Arc::clone(&handler);
            let in_flight = Arc::clone(&in_flight);
            let worker = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    for job in receiver.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(|| (*handler)(job))).is_err() {
                            Logger::error("WAL_REPLAY_TASK_PANICKED", &[]);
                        }
                        in_flight.done();
                    }
                })?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            in_flight,
        })
    }

    /// Queue a job without blocking. The job comes back on rejection.
    pub fn try_submit(&self, job: T) -> Result<(), (T, PoolRejection)> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = match sender.as_ref() {
            Some(s) => s,
            None => return Err((job, PoolRejection::Closed)),
        };
        self.in_flight.add();
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.in_flight.done();
                match e {
                    TrySendError::Full(job) => Err((job, PoolRejection::Full)),
                    TrySendError::Disconnected(job) => Err((job, PoolRejection::Closed)),
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until every accepted job has finished or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.in_flight.idle.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    /// Stop accepting jobs, let workers finish the queue, join them.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                Logger::error("WAL_REPLAY_WORKER_JOIN_FAILED", &[]);
            }
        }
    }
}

impl<T: Send + 'static> Drop for ReplayPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
