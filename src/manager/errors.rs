//! WAL manager error types
//!
//! Error codes:
//! - AERO_WALMGR_CONFIG (FATAL: unusable directory set, process must not start)
//! - AERO_WALMGR_NOT_FOUND
//! - AERO_WALMGR_ALREADY_EXISTS
//! - AERO_WALMGR_RESOURCE_EXHAUSTED
//! - AERO_WALMGR_IO
//! - AERO_WALMGR_REPLAY_FAILED
//! - AERO_WALMGR_INVALID_TRANSITION
//! - AERO_WALMGR_CODEC
//! - AERO_WALMGR_INTERNAL
//!
//! Every error is returned to the immediate caller. Only `Config` is fatal.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ledger::WalStatus;
use crate::wal::WalError;

/// Result type for WAL manager operations
pub type WalManagerResult<T> = Result<T, WalManagerError>;

/// WAL manager errors
#[derive(Debug, Error)]
pub enum WalManagerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("WAL {0} is already registered")]
    AlreadyExists(i64),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("I/O error on {}: {context}: {source}", path.display())]
    Io {
        path: PathBuf,
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Replay of WAL {wal_id} failed: {reason}")]
    ReplayFailed { wal_id: i64, reason: String },

    #[error("WAL {wal_id} cannot move from {from} to {to}")]
    InvalidTransition {
        wal_id: i64,
        from: WalStatus,
        to: WalStatus,
    },

    #[error("WAL codec error: {0}")]
    Codec(#[from] WalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalManagerError {
    /// Wrap an I/O failure with the path and the operation that hit it.
    pub fn io(path: impl AsRef<Path>, context: &'static str, source: io::Error) -> Self {
        WalManagerError::Io {
            path: path.as_ref().to_path_buf(),
            context,
            source,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        WalManagerError::Internal(format!("{} lock poisoned", what))
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            WalManagerError::Config(_) => "AERO_WALMGR_CONFIG",
            WalManagerError::NotFound(_) => "AERO_WALMGR_NOT_FOUND",
            WalManagerError::AlreadyExists(_) => "AERO_WALMGR_ALREADY_EXISTS",
            WalManagerError::ResourceExhausted(_) => "AERO_WALMGR_RESOURCE_EXHAUSTED",
            WalManagerError::Io { .. } => "AERO_WALMGR_IO",
            WalManagerError::ReplayFailed { .. } => "AERO_WALMGR_REPLAY_FAILED",
            WalManagerError::InvalidTransition { .. } => "AERO_WALMGR_INVALID_TRANSITION",
            WalManagerError::Codec(_) => "AERO_WALMGR_CODEC",
            WalManagerError::Internal(_) => "AERO_WALMGR_INTERNAL",
        }
    }

    /// Whether the process should refuse to start on this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, WalManagerError::Config(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WalManagerError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_is_fatal() {
        assert!(WalManagerError::Config("no dirs".into()).is_fatal());
        assert!(!WalManagerError::NotFound("wal 1".into()).is_fatal());
        assert!(!WalManagerError::ResourceExhausted("full".into()).is_fatal());
        assert!(!WalManagerError::io("/x", "unlink", io::Error::other("boom")).is_fatal());
    }

    #[test]
    fn test_codes() {
        assert_eq!(WalManagerError::AlreadyExists(3).code(), "AERO_WALMGR_ALREADY_EXISTS");
        assert_eq!(
            WalManagerError::InvalidTransition {
                wal_id: 1,
                from: WalStatus::Replay,
                to: WalStatus::Prepare,
            }
            .code(),
            "AERO_WALMGR_INVALID_TRANSITION"
        );
    }

    #[test]
    fn test_io_display_includes_path_and_context() {
        let err = WalManagerError::io("/wal/1/2/x", "unlink wal", io::Error::other("denied"));
        let msg = err.to_string();
        assert!(msg.contains("/wal/1/2/x"));
        assert!(msg.contains("unlink wal"));
        assert!(msg.contains("denied"));
    }
}
