//! CLI module for aerowal
//!
//! Provides command-line inspection of WAL directories:
//! - check-config: validate a config file
//! - scan: list recoverable WALs
//! - usage: quota and usage per directory

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, LogLevel};
pub use commands::{check_config, run, run_command, scan, usage};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
