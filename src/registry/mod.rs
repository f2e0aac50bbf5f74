//! WAL Registry
//!
//! wal_id -> `WalEntry` for every active WAL. The registry owns entries
//! exclusively; the status ledger and the replay queues only refer to them
//! by id or hold clones.
//!
//! The map is guarded by its own lock and never held across filesystem I/O.

mod path;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::Serialize;

pub use path::{
    decode_wal_path, final_path_of, quarantine_path, table_dir, wal_path, WalFileName,
    WalLocation, QUARANTINE_DIR,
};

use crate::manager::{WalManagerError, WalManagerResult};

/// One active write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalEntry {
    pub wal_id: i64,
    pub db_id: i64,
    pub table_id: i64,
    pub label: String,
    /// Final path (without `.prepare`)
    pub path: PathBuf,
}

/// Outcome of `WalRegistry::register_recovered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// Same wal_id already registered at the same path
    AlreadyPresent,
}

#[derive(Debug, Default)]
pub struct WalRegistry {
    entries: RwLock<HashMap<i64, WalEntry>>,
}

impl WalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new WAL. Fails with `AlreadyExists` on a duplicate id.
    pub fn insert(&self, entry: WalEntry) -> WalManagerResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?;
        if entries.contains_key(&entry.wal_id) {
            return Err(WalManagerError::AlreadyExists(entry.wal_id));
        }
        entries.insert(entry.wal_id, entry);
        Ok(())
    }

    /// Register a WAL found on disk or handed back by a failed writer.
    ///
    /// Re-registering the same id at the same path is accepted; the same id
    /// at a different path is `AlreadyExists`.
    pub fn register_recovered(&self, entry: WalEntry) -> WalManagerResult<Registration> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?;
        match entries.get(&entry.wal_id) {
            Some(existing) if existing.path == entry.path => Ok(Registration::AlreadyPresent),
            Some(_) => Err(WalManagerError::AlreadyExists(entry.wal_id)),
            None => {
                entries.insert(entry.wal_id, entry);
                Ok(Registration::Inserted)
            }
        }
    }

    pub fn contains(&self, wal_id: i64) -> WalManagerResult<bool> {
        Ok(self
            .entries
            .read()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?
            .contains_key(&wal_id))
    }

    /// Fails with `NotFound` if unregistered.
    pub fn get(&self, wal_id: i64) -> WalManagerResult<WalEntry> {
        self.entries
            .read()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?
            .get(&wal_id)
            .cloned()
            .ok_or_else(|| WalManagerError::NotFound(format!("wal {}", wal_id)))
    }

    pub fn get_path(&self, wal_id: i64) -> WalManagerResult<PathBuf> {
        self.get(wal_id).map(|e| e.path)
    }

    /// Remove and return the entry, `None` if absent.
    pub fn remove(&self, wal_id: i64) -> WalManagerResult<Option<WalEntry>> {
        Ok(self
            .entries
            .write()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?
            .remove(&wal_id))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, sorted by wal_id.
    pub fn entries(&self) -> WalManagerResult<Vec<WalEntry>> {
        let mut all: Vec<WalEntry> = self
            .entries
            .read()
            .map_err(|_| WalManagerError::poisoned("wal registry"))?
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|e| e.wal_id);
        Ok(all)
    }
}
