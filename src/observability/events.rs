//! Observability events for aerowal
//!
//! Every line the manager logs is keyed by one of these events.
//! Events are explicit and typed.

use std::fmt;

/// Observable events in the WAL manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// `init()` begins
    ManagerInitBegin,
    /// Recovery scan done and background threads running
    ManagerInitComplete,
    /// `init()` failed (FATAL: the process should not start)
    ManagerInitFailed,
    /// `stop()` begins
    ManagerStopBegin,
    /// Threads joined and pool drained
    ManagerStopComplete,

    // Capacity
    /// Directory accepted during configuration
    DirConfigured,
    /// Directory rejected during configuration
    DirRejected,
    /// Periodic usage sample taken
    DirUsageSampled,
    /// Usage sampling failed
    DirSampleFailed,
    /// Directory reached its I/O failure threshold
    DirDegraded,
    /// Pre-allocation counter would have gone below zero
    PreallocatedUnderflow,
    /// No directory had room for a new WAL
    AdmissionRejected,

    // Registry
    /// A new WAL path was assigned
    PathCreated,
    /// A WAL was removed from disk and from the registry
    WalDeleted,

    // Recovery
    /// One directory scanned for leftover WALs
    RecoveryScan,
    /// A file in a WAL directory did not decode as a WAL name
    RecoverySkipped,
    /// A WAL was registered for replay
    WalRecovered,

    // Replay
    /// Replay task handed to the worker pool
    ReplaySubmitted,
    /// Replay succeeded and the WAL was erased
    ReplaySucceeded,
    /// Replay failed transiently and the WAL was requeued
    ReplayRetry,
    /// Replay failed permanently
    ReplayFailed,
    /// Incomplete WAL renamed to its final name before replay
    WalSealed,
    /// Failed WAL moved into the quarantine directory
    WalQuarantined,

    // Diagnostics
    /// Status queue dump line
    StatusQueue,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ManagerInitBegin => "WAL_MANAGER_INIT_BEGIN",
            Event::ManagerInitComplete => "WAL_MANAGER_INIT_COMPLETE",
            Event::ManagerInitFailed => "WAL_MANAGER_INIT_FAILED",
            Event::ManagerStopBegin => "WAL_MANAGER_STOP_BEGIN",
            Event::ManagerStopComplete => "WAL_MANAGER_STOP_COMPLETE",

            Event::DirConfigured => "WAL_DIR_CONFIGURED",
            Event::DirRejected => "WAL_DIR_REJECTED",
            Event::DirUsageSampled => "WAL_DIR_USAGE_SAMPLED",
            Event::DirSampleFailed => "WAL_DIR_SAMPLE_FAILED",
            Event::DirDegraded => "WAL_DIR_DEGRADED",
            Event::PreallocatedUnderflow => "WAL_PREALLOCATED_UNDERFLOW",
            Event::AdmissionRejected => "WAL_ADMISSION_REJECTED",

            Event::PathCreated => "WAL_PATH_CREATED",
            Event::WalDeleted => "WAL_DELETED",

            Event::RecoveryScan => "WAL_RECOVERY_SCAN",
            Event::RecoverySkipped => "WAL_RECOVERY_SKIPPED",
            Event::WalRecovered => "WAL_RECOVERED",

            Event::ReplaySubmitted => "WAL_REPLAY_SUBMITTED",
            Event::ReplaySucceeded => "WAL_REPLAY_SUCCEEDED",
            Event::ReplayRetry => "WAL_REPLAY_RETRY",
            Event::ReplayFailed => "WAL_REPLAY_FAILED",
            Event::WalSealed => "WAL_SEALED",
            Event::WalQuarantined => "WAL_QUARANTINED",

            Event::StatusQueue => "WAL_STATUS_QUEUE",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::ManagerInitFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
