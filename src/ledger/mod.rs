//! Status & Metadata Ledger
//!
//! Two independent maps with no side effects beyond themselves:
//! per-table WAL lifecycle status (for observability) and per-WAL column
//! index mapping (read by replay).

mod column_index;
mod status;

pub use column_index::ColumnIndexMap;
pub use status::{StatusLedger, StatusQueueRequest, StatusQueueSizes, WalStatus};
