//! Observability for the WAL manager
//!
//! - Structured logging (JSON, one line per event)
//! - Lock-free counters
//! - Begin/complete scopes around long operations
//!
//! Observability is read-only: nothing here feeds back into admission or
//! replay decisions, and a broken log sink never fails an operation.
//!
//! ```ignore
//! use aerowal::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::PathCreated, &[("wal_id", "42")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{WalMetrics, WalMetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Log a lifecycle event at INFO (or FATAL for fatal events)
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields at INFO (or FATAL for fatal events)
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    if event.is_fatal() {
        Logger::fatal(event.as_str(), fields);
    } else {
        Logger::info(event.as_str(), fields);
    }
}

/// Log an event at an explicit severity
pub fn log_event_at(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    match severity {
        Severity::Error | Severity::Fatal => Logger::log_stderr(severity, event.as_str(), fields),
        _ => Logger::log(severity, event.as_str(), fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::ManagerInitBegin);
        log_event(Event::ManagerInitComplete);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::DirConfigured, &[("dir", "/tmp/wal")]);
        log_event_at(Severity::Warn, Event::DirSampleFailed, &[("dir", "/tmp/wal")]);
    }
}
