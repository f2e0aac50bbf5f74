//! CLI command implementations
//!
//! Read-only inspection of WAL directories. Nothing here registers,
//! replays or deletes a WAL; `usage` creates configured directories that
//! do not exist yet, exactly as the manager would on startup.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::capacity::{CapacityTracker, DirUsageSampler, FsUsageSampler};
use crate::config::WalManagerConfig;
use crate::observability::{Logger, WalMetrics};
use crate::replay::scan_wal_dir;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    Logger::set_min_severity(cli.log_level.into());
    run_command(cli.command)
}

/// Run one command and print its JSON response
pub fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::CheckConfig { config } => check_config(&config),
        Command::Scan { config } => scan(&config),
        Command::Usage { config } => usage(&config),
    };
    match result {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

/// Load and validate a config file, returning it with defaults applied.
pub fn check_config(config_path: &Path) -> CliResult<Value> {
    let config = WalManagerConfig::load(config_path)?;
    Ok(serde_json::to_value(&config)?)
}

/// List every WAL file a restart would recover, per directory.
pub fn scan(config_path: &Path) -> CliResult<Value> {
    let config = WalManagerConfig::load(config_path)?;
    let mut dirs = Vec::with_capacity(config.wal_dirs.len());

    for dir in &config.wal_dirs {
        if !dir.path.is_dir() {
            dirs.push(json!({
                "dir": dir.path.display().to_string(),
                "error": "not a directory",
            }));
            continue;
        }
        let report = scan_wal_dir(&dir.path)?;
        let wals: Vec<Value> = report
            .found
            .iter()
            .map(|w| {
                json!({
                    "wal_id": w.wal_id,
                    "db_id": w.db_id,
                    "table_id": w.table_id,
                    "label": w.label,
                    "path": w.path.display().to_string(),
                    "incomplete": w.incomplete,
                })
            })
            .collect();
        dirs.push(json!({
            "dir": dir.path.display().to_string(),
            "wals": wals,
            "skipped": report.skipped,
        }));
    }

    Ok(json!({ "dirs": dirs }))
}

/// Sample every directory and report quota, usage and availability.
pub fn usage(config_path: &Path) -> CliResult<Value> {
    let config = WalManagerConfig::load(config_path)?;
    usage_with(&config, Arc::new(FsUsageSampler))
}

fn usage_with(config: &WalManagerConfig, sampler: Arc<dyn DirUsageSampler>) -> CliResult<Value> {
    let tracker = CapacityTracker::configure(config, sampler, Arc::new(WalMetrics::new()))?;
    tracker.refresh_all();
    // a failed sample leaves a nonzero failure streak after one pass
    if tracker.dirs().iter().all(|d| d.io_failures() > 0) {
        return Err(CliError::inspect_failed("no WAL directory could be sampled"));
    }
    Ok(json!({
        "dirs": serde_json::to_value(tracker.snapshot())?,
        "max_available": tracker.max_available(),
    }))
}
