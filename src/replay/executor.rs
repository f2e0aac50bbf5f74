//! Replay execution contract
//!
//! The manager decides when a WAL is replayed; the executor decides how its
//! rows are turned into load requests.

use std::fmt;

use crate::registry::WalEntry;

/// How a failed replay should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayErrorKind {
    /// Worth retrying after a backoff
    Transient,
    /// Retrying cannot help (table dropped, WAL unreadable)
    Permanent,
}

/// Failure reported by a `ReplayExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayError {
    kind: ReplayErrorKind,
    message: String,
}

impl ReplayError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ReplayErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ReplayErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ReplayErrorKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ReplayErrorKind::Permanent
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ReplayErrorKind::Transient => "transient",
            ReplayErrorKind::Permanent => "permanent",
        };
        write!(f, "{} replay failure: {}", kind, self.message)
    }
}

impl std::error::Error for ReplayError {}

/// Applies one WAL to its table.
///
/// Called from replay pool threads, possibly for several WALs of the same
/// table at once. `columns` is the WAL's column index mapping if one was
/// registered.
pub trait ReplayExecutor: Send + Sync {
    fn replay(&self, entry: &WalEntry, columns: Option<&[usize]>) -> Result<(), ReplayError>;
}

impl<F> ReplayExecutor for F
where
    F: Fn(&WalEntry, Option<&[usize]>) -> Result<(), ReplayError> + Send + Sync,
{
    fn replay(&self, entry: &WalEntry, columns: Option<&[usize]>) -> Result<(), ReplayError> {
        self(entry, columns)
    }
}
