//! Startup scan for leftover WALs
//!
//! Walks `<wal_dir>/<db_id>/<table_id>/<file>` and decodes every file name.
//! The quarantine directory is never entered. Anything that does not decode,
//! and any db or table directory that cannot be listed, is logged and left
//! alone.

use std::fs;
use std::path::{Path, PathBuf};

use crate::manager::{WalManagerError, WalManagerResult};
use crate::observability::{log_event_at, Event, Severity};
use crate::registry::{decode_wal_path, QUARANTINE_DIR};

/// A WAL file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredWal {
    pub db_id: i64,
    pub table_id: i64,
    pub wal_id: i64,
    pub label: String,
    /// Path as found, `.prepare` suffix included
    pub path: PathBuf,
    /// Writer never finished
    pub incomplete: bool,
}

/// Result of scanning one directory.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Sorted by wal_id
    pub found: Vec<RecoveredWal>,
    pub skipped: usize,
}

fn read_dir_sorted(path: &Path) -> WalManagerResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let iter = fs::read_dir(path).map_err(|e| WalManagerError::io(path, "read wal dir", e))?;
    for entry in iter {
        let entry = entry.map_err(|e| WalManagerError::io(path, "read wal dir entry", e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn skip(report: &mut ScanReport, path: &Path, reason: &str) {
    report.skipped += 1;
    log_event_at(
        Severity::Warn,
        Event::RecoverySkipped,
        &[("path", &path.display().to_string()), ("reason", reason)],
    );
}

/// Find every WAL under `wal_dir`. Only an unreadable `wal_dir` is an error.
pub fn scan_wal_dir(wal_dir: &Path) -> WalManagerResult<ScanReport> {
    let mut report = ScanReport::default();

    for db_path in read_dir_sorted(wal_dir)? {
        if !db_path.is_dir() {
            continue;
        }
        if db_path.file_name().map_or(false, |n| n == QUARANTINE_DIR) {
            continue;
        }
        scan_db_dir(&mut report, wal_dir, &db_path);
    }

    report.found.sort_by_key(|w| w.wal_id);
    Ok(report)
}

fn scan_db_dir(report: &mut ScanReport, wal_dir: &Path, db_path: &Path) {
    let tables = match read_dir_sorted(db_path) {
        Ok(tables) => tables,
        Err(e) => return skip(report, db_path, &e.to_string()),
    };
    for table_path in tables {
        if !table_path.is_dir() {
            skip(report, &table_path, "not a table directory");
            continue;
        }
        scan_table_dir(report, wal_dir, &table_path);
    }
}

fn scan_table_dir(report: &mut ScanReport, wal_dir: &Path, table_path: &Path) {
    let files = match read_dir_sorted(table_path) {
        Ok(files) => files,
        Err(e) => return skip(report, table_path, &e.to_string()),
    };
    for file in files {
        if !file.is_file() {
            skip(report, &file, "not a file");
            continue;
        }
        match decode_wal_path(wal_dir, &file) {
            Some(loc) => report.found.push(RecoveredWal {
                db_id: loc.db_id,
                table_id: loc.table_id,
                wal_id: loc.name.wal_id,
                label: loc.name.label,
                path: file,
                incomplete: loc.name.incomplete,
            }),
            None => skip(report, &file, "undecodable wal path"),
        }
    }
}
