//! Per-table, per-WAL lifecycle status
//!
//! Diagnostic bookkeeping only: nothing in admission or replay reads it to
//! make decisions. External monitoring reads it through
//! `query_status_queue_sizes`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::manager::{WalManagerError, WalManagerResult};
use crate::observability::{log_event_with_fields, Event};

/// Lifecycle status of one WAL.
///
/// Ordered by lifecycle position: `Prepare < Create < Replay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalStatus {
    /// Path reserved, writer not finished
    Prepare,
    /// Fully written and durable, eligible for replay
    Create,
    /// Owned by a replay task
    Replay,
}

impl WalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalStatus::Prepare => "PREPARE",
            WalStatus::Create => "CREATE",
            WalStatus::Replay => "REPLAY",
        }
    }

    /// Valid forward moves. Removal is not a status; it is `erase_status`.
    pub fn can_transition_to(self, next: WalStatus) -> bool {
        matches!(
            (self, next),
            (WalStatus::Prepare, WalStatus::Create)
                | (WalStatus::Create, WalStatus::Replay)
                | (WalStatus::Replay, WalStatus::Create)
        )
    }
}

impl fmt::Display for WalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter for `query_status_queue_sizes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusQueueRequest {
    /// Restrict to one table; `None` reports every table.
    pub table_id: Option<i64>,
    /// Count WALs whose status is at or below this one.
    pub max_status: WalStatus,
}

impl StatusQueueRequest {
    /// Every WAL of every table.
    pub fn all() -> Self {
        Self {
            table_id: None,
            max_status: WalStatus::Replay,
        }
    }

    pub fn for_table(table_id: i64, max_status: WalStatus) -> Self {
        Self {
            table_id: Some(table_id),
            max_status,
        }
    }
}

/// Per-table queue depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusQueueSizes {
    pub per_table: BTreeMap<i64, usize>,
    pub total: usize,
}

/// table_id -> wal_id -> status
#[derive(Debug, Default)]
pub struct StatusLedger {
    queues: RwLock<HashMap<i64, HashMap<i64, WalStatus>>>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for a WAL.
    ///
    /// A WAL seen for the first time may start in any status. For a known
    /// WAL only `Prepare -> Create`, `Create -> Replay` and `Replay -> Create`
    /// are accepted; setting the current status again is a no-op.
    pub fn set_status(&self, table_id: i64, wal_id: i64, status: WalStatus) -> WalManagerResult<()> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| WalManagerError::poisoned("wal status"))?;
        let table = queues.entry(table_id).or_default();
        match table.get(&wal_id).copied() {
            Some(current) if current == status => Ok(()),
            Some(current) if !current.can_transition_to(status) => {
                Err(WalManagerError::InvalidTransition {
                    wal_id,
                    from: current,
                    to: status,
                })
            }
            _ => {
                table.insert(wal_id, status);
                Ok(())
            }
        }
    }

    pub fn get_status(&self, table_id: i64, wal_id: i64) -> WalManagerResult<WalStatus> {
        let queues = self
            .queues
            .read()
            .map_err(|_| WalManagerError::poisoned("wal status"))?;
        queues
            .get(&table_id)
            .and_then(|t| t.get(&wal_id))
            .copied()
            .ok_or_else(|| {
                WalManagerError::NotFound(format!("status of wal {} in table {}", wal_id, table_id))
            })
    }

    /// Remove a WAL's status. Fails with `NotFound` for an unknown key.
    pub fn erase_status(&self, table_id: i64, wal_id: i64) -> WalManagerResult<()> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| WalManagerError::poisoned("wal status"))?;
        let table = queues.get_mut(&table_id).ok_or_else(|| {
            WalManagerError::NotFound(format!("status queue of table {}", table_id))
        })?;
        if table.remove(&wal_id).is_none() {
            return Err(WalManagerError::NotFound(format!(
                "status of wal {} in table {}",
                wal_id, table_id
            )));
        }
        if table.is_empty() {
            queues.remove(&table_id);
        }
        Ok(())
    }

    /// Count WALs per table whose status is at or below `request.max_status`.
    ///
    /// A table named in the request but unknown to the ledger reports 0.
    pub fn query_status_queue_sizes(
        &self,
        request: &StatusQueueRequest,
    ) -> WalManagerResult<StatusQueueSizes> {
        let queues = self
            .queues
            .read()
            .map_err(|_| WalManagerError::poisoned("wal status"))?;

        let count = |statuses: &HashMap<i64, WalStatus>| {
            statuses.values().filter(|s| **s <= request.max_status).count()
        };

        let mut sizes = StatusQueueSizes::default();
        match request.table_id {
            Some(table_id) => {
                let n = queues.get(&table_id).map(count).unwrap_or(0);
                sizes.per_table.insert(table_id, n);
            }
            None => {
                for (table_id, statuses) in queues.iter() {
                    sizes.per_table.insert(*table_id, count(statuses));
                }
            }
        }
        sizes.total = sizes.per_table.values().sum();
        Ok(sizes)
    }

    /// Dump every queue to the log, one line per table.
    pub fn log_queues(&self) -> WalManagerResult<()> {
        let queues = self
            .queues
            .read()
            .map_err(|_| WalManagerError::poisoned("wal status"))?;
        let mut tables: Vec<_> = queues.iter().collect();
        tables.sort_by_key(|(id, _)| **id);
        for (table_id, statuses) in tables {
            let mut wals: Vec<_> = statuses.iter().collect();
            wals.sort_by_key(|(id, _)| **id);
            let rendered = wals
                .iter()
                .map(|(id, s)| format!("{}:{}", id, s))
                .collect::<Vec<_>>()
                .join(",");
            log_event_with_fields(
                Event::StatusQueue,
                &[("table_id", &table_id.to_string()), ("wals", &rendered)],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lifecycle() {
        let ledger = StatusLedger::new();
        ledger.set_status(1, 10, WalStatus::Prepare).unwrap();
        ledger.set_status(1, 10, WalStatus::Create).unwrap();
        ledger.set_status(1, 10, WalStatus::Replay).unwrap();
        ledger.set_status(1, 10, WalStatus::Create).unwrap();
        ledger.set_status(1, 10, WalStatus::Replay).unwrap();
        ledger.erase_status(1, 10).unwrap();
        assert!(ledger.get_status(1, 10).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rejects_backward_moves() {
        let ledger = StatusLedger::new();
        ledger.set_status(1, 10, WalStatus::Replay).unwrap();
        let err = ledger.set_status(1, 10, WalStatus::Prepare).unwrap_err();
        assert!(matches!(err, WalManagerError::InvalidTransition { .. }));
        assert_eq!(ledger.get_status(1, 10).unwrap(), WalStatus::Replay);

        ledger.set_status(1, 11, WalStatus::Prepare).unwrap();
        assert!(ledger.set_status(1, 11, WalStatus::Replay).is_err());
    }

    #[test]
    fn test_same_status_is_noop() {
        let ledger = StatusLedger::new();
        ledger.set_status(1, 10, WalStatus::Create).unwrap();
        ledger.set_status(1, 10, WalStatus::Create).unwrap();
        assert_eq!(ledger.get_status(1, 10).unwrap(), WalStatus::Create);
    }

    #[test]
    fn test_erase_unknown_is_not_found() {
        let ledger = StatusLedger::new();
        assert!(ledger.erase_status(1, 10).unwrap_err().is_not_found());
        ledger.set_status(1, 11, WalStatus::Create).unwrap();
        assert!(ledger.erase_status(1, 10).unwrap_err().is_not_found());
    }

    #[test]
    fn test_queue_sizes_at_or_below() {
        let ledger = StatusLedger::new();
        ledger.set_status(1, 10, WalStatus::Prepare).unwrap();
        ledger.set_status(1, 11, WalStatus::Create).unwrap();
        ledger.set_status(1, 12, WalStatus::Replay).unwrap();
        ledger.set_status(2, 20, WalStatus::Create).unwrap();

        let all = ledger.query_status_queue_sizes(&StatusQueueRequest::all()).unwrap();
        assert_eq!(all.per_table[&1], 3);
        assert_eq!(all.per_table[&2], 1);
        assert_eq!(all.total, 4);

        let created = ledger
            .query_status_queue_sizes(&StatusQueueRequest {
                table_id: None,
                max_status: WalStatus::Create,
            })
            .unwrap();
        assert_eq!(created.per_table[&1], 2);
        assert_eq!(created.total, 3);

        let one = ledger
            .query_status_queue_sizes(&StatusQueueRequest::for_table(1, WalStatus::Prepare))
            .unwrap();
        assert_eq!(one.per_table.len(), 1);
        assert_eq!(one.total, 1);

        let missing = ledger
            .query_status_queue_sizes(&StatusQueueRequest::for_table(99, WalStatus::Replay))
            .unwrap();
        assert_eq!(missing.per_table[&99], 0);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&WalStatus::Create).unwrap(), "\"CREATE\"");
    }

    #[test]
    fn test_log_queues() {
        let ledger = StatusLedger::new();
        ledger.set_status(3, 30, WalStatus::Create).unwrap();
        ledger.log_queues().unwrap();
    }
}
