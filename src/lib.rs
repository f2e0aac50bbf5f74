//! aerowal - coordination layer for a write-ahead-log subsystem
//!
//! Tracks disk quota per WAL directory, admits or rejects new WALs under
//! backpressure, assigns on-disk locations, and drives crash-recovery
//! replay of WALs left behind by a previous run.
//!
//! ```ignore
//! use std::sync::Arc;
//! use aerowal::{ReplayError, WalEntry, WalManager, WalManagerConfig};
//!
//! let config = WalManagerConfig::load("aerowal.json".as_ref())?;
//! let executor = Arc::new(|entry: &WalEntry, _columns: Option<&[usize]>| {
//!     load_into_table(entry).map_err(|e| ReplayError::transient(e.to_string()))
//! });
//! let manager = WalManager::new(config, executor)?;
//! manager.init()?;
//! let path = manager.create_wal_path(db_id, table_id, wal_id, "load-1")?;
//! ```

pub mod capacity;
pub mod cli;
pub mod config;
pub mod ledger;
pub mod manager;
pub mod observability;
pub mod registry;
pub mod replay;
pub mod wal;

pub use capacity::{DirUsageSampler, FsUsageSampler, StaticUsageSampler, WalDirSnapshot};
pub use config::{WalDirConfig, WalManagerConfig};
pub use ledger::{StatusQueueRequest, StatusQueueSizes, WalStatus};
pub use manager::{WalManager, WalManagerError, WalManagerResult};
pub use registry::WalEntry;
pub use replay::{FailedWal, ReplayError, ReplayErrorKind, ReplayExecutor};
