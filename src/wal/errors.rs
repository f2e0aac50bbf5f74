//! WAL codec error types
//!
//! Error codes:
//! - AERO_WAL_IO
//! - AERO_WAL_CORRUPTION
//! - AERO_WAL_UNSUPPORTED_VERSION

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for WAL codec operations
pub type WalResult<T> = Result<T, WalError>;

/// WAL codec errors
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error on {}: {message}: {source}", path.display())]
    Io {
        path: PathBuf,
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("WAL corruption in {} at byte {offset}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Unsupported WAL version {found} in {}", path.display())]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

impl WalError {
    pub(crate) fn io(path: impl Into<PathBuf>, message: impl Into<String>, source: io::Error) -> Self {
        WalError::Io {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, offset: u64, reason: impl Into<String>) -> Self {
        WalError::Corruption {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            WalError::Io { .. } => "AERO_WAL_IO",
            WalError::Corruption { .. } => "AERO_WAL_CORRUPTION",
            WalError::UnsupportedVersion { .. } => "AERO_WAL_UNSUPPORTED_VERSION",
        }
    }

    /// Whether the file content itself is bad (as opposed to the disk failing)
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalError::Corruption { .. } | WalError::UnsupportedVersion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let c = WalError::corruption("/w", 12, "bad crc");
        assert_eq!(c.code(), "AERO_WAL_CORRUPTION");
        assert!(c.is_corruption());
        assert!(c.to_string().contains("byte 12"));

        let io = WalError::io("/w", "open", io::Error::other("nope"));
        assert_eq!(io.code(), "AERO_WAL_IO");
        assert!(!io.is_corruption());
    }
}
