//! Stop / wake signal for background loops
//!
//! Loops block on "stop requested OR woken OR timeout", never on a bare sleep.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SignalState {
    stopped: bool,
    woken: bool,
}

#[derive(Debug, Default)]
pub struct BackgroundSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl BackgroundSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the stop flag and release every waiter.
    pub fn stop(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stopped = true;
        self.cv.notify_all();
    }

    /// Cut the current wait short. A wake with no waiter is kept for the next wait.
    pub fn wake(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).woken = true;
        self.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stopped
    }

    /// Wait up to `timeout`. Returns true if stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.stopped {
                return true;
            }
            if state.woken {
                state.woken = false;
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.cv.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }
}
