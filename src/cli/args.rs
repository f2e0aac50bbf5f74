//! CLI argument definitions using clap
//!
//! Commands:
//! - aerowal check-config --config <path>
//! - aerowal scan --config <path>
//! - aerowal usage --config <path>

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::observability::Severity;

/// aerowal - WAL directory inspection
#[derive(Parser, Debug)]
#[command(name = "aerowal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Lowest log severity written
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration file and print it with defaults filled in
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./aerowal.json")]
        config: PathBuf,
    },

    /// List the WALs a restart would recover, without touching them
    Scan {
        /// Path to configuration file
        #[arg(long, default_value = "./aerowal.json")]
        config: PathBuf,
    },

    /// Sample every WAL directory and print its quota and usage
    Usage {
        /// Path to configuration file
        #[arg(long, default_value = "./aerowal.json")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Severity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Info => Severity::Info,
            LogLevel::Warn => Severity::Warn,
            LogLevel::Error => Severity::Error,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from(["aerowal", "scan", "--config", "/etc/aerowal.json"]).unwrap();
        match cli.command {
            Command::Scan { config } => assert_eq!(config, PathBuf::from("/etc/aerowal.json")),
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_parse_log_level() {
        let cli = Cli::try_parse_from(["aerowal", "usage", "--log-level", "trace"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Trace);
        assert_eq!(Severity::from(cli.log_level), Severity::Trace);
    }
}
