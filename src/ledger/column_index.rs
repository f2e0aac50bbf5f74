//! wal_id -> column positions
//!
//! Describes how a WAL's serialized columns map onto the current table
//! schema. Set before replay, read during replay, erased after; an entry
//! that is never erased stays for the life of the process.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::manager::{WalManagerError, WalManagerResult};

#[derive(Debug, Default)]
pub struct ColumnIndexMap {
    map: RwLock<HashMap<i64, Vec<usize>>>,
}

impl ColumnIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the mapping for `wal_id`.
    pub fn set(&self, wal_id: i64, indices: Vec<usize>) -> WalManagerResult<()> {
        self.map
            .write()
            .map_err(|_| WalManagerError::poisoned("column index"))?
            .insert(wal_id, indices);
        Ok(())
    }

    /// Fails with `NotFound` if never set.
    pub fn get(&self, wal_id: i64) -> WalManagerResult<Vec<usize>> {
        self.map
            .read()
            .map_err(|_| WalManagerError::poisoned("column index"))?
            .get(&wal_id)
            .cloned()
            .ok_or_else(|| WalManagerError::NotFound(format!("column index of wal {}", wal_id)))
    }

    /// Erasing an absent id is a no-op.
    pub fn erase(&self, wal_id: i64) -> WalManagerResult<()> {
        self.map
            .write()
            .map_err(|_| WalManagerError::poisoned("column index"))?
            .remove(&wal_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_before_set_is_not_found() {
        let map = ColumnIndexMap::new();
        assert!(map.get(5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_get_erase() {
        let map = ColumnIndexMap::new();
        map.set(5, vec![2, 0, 1]).unwrap();
        assert_eq!(map.get(5).unwrap(), vec![2, 0, 1]);

        map.set(5, vec![0]).unwrap();
        assert_eq!(map.get(5).unwrap(), vec![0]);

        map.erase(5).unwrap();
        map.erase(5).unwrap();
        assert!(map.get(5).is_err());
        assert!(map.is_empty());
    }
}
