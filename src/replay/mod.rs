//! Replay Coordinator
//!
//! Per WAL: `discovered -> queued -> replaying -> {done | failed -> requeued}`.
//!
//! - `scanner` finds leftover WALs at startup
//! - `WalTable` holds one table's replay queue
//! - `ReplayPool` runs replay tasks on a bounded set of threads
//! - `RetryPolicy` spaces out retries of transient failures
//!
//! The driver loop and the task body live in `manager`, which owns the
//! registry and ledgers a finished replay has to clean up.

mod executor;
mod pool;
mod retry;
mod scanner;
mod table;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub use executor::{ReplayError, ReplayErrorKind, ReplayExecutor};
pub use pool::{PoolRejection, ReplayPool};
pub use retry::RetryPolicy;
pub use scanner::{scan_wal_dir, RecoveredWal, ScanReport};
pub use table::{FailedWal, QueuedWal, WalTable};

use crate::manager::{WalManagerError, WalManagerResult};

/// table_id -> replay state. Tables are created on first use and kept.
pub struct TableMap {
    tables: RwLock<BTreeMap<i64, Arc<WalTable>>>,
    executor: Arc<dyn ReplayExecutor>,
}

impl TableMap {
    pub fn new(executor: Arc<dyn ReplayExecutor>) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            executor,
        }
    }

    pub fn get_or_create(&self, table_id: i64) -> WalManagerResult<Arc<WalTable>> {
        if let Some(table) = self.get(table_id)? {
            return Ok(table);
        }
        let mut tables = self
            .tables
            .write()
            .map_err(|_| WalManagerError::poisoned("wal table map"))?;
        let table = tables
            .entry(table_id)
            .or_insert_with(|| Arc::new(WalTable::new(table_id, Arc::clone(&self.executor))));
        Ok(Arc::clone(table))
    }

    pub fn get(&self, table_id: i64) -> WalManagerResult<Option<Arc<WalTable>>> {
        Ok(self
            .tables
            .read()
            .map_err(|_| WalManagerError::poisoned("wal table map"))?
            .get(&table_id)
            .cloned())
    }

    /// Forget a table. Tasks already holding it keep it alive until they finish.
    pub fn remove(&self, table_id: i64) -> WalManagerResult<Option<Arc<WalTable>>> {
        Ok(self
            .tables
            .write()
            .map_err(|_| WalManagerError::poisoned("wal table map"))?
            .remove(&table_id))
    }

    /// Every table, ordered by table_id.
    pub fn all(&self) -> WalManagerResult<Vec<Arc<WalTable>>> {
        Ok(self
            .tables
            .read()
            .map_err(|_| WalManagerError::poisoned("wal table map"))?
            .values()
            .cloned()
            .collect())
    }
}
