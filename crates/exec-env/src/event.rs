//! Structured trace events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// A lifecycle or output event of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The rendered command line, absent for free-standing warnings
    pub command: Option<String>,
    /// The type of event
    pub kind: TraceEventKind,
}

impl TraceEvent {
    /// Create a new event stamped with the current time
    pub fn new(command: Option<String>, kind: TraceEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            command,
            kind,
        }
    }
}

/// Types of trace events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraceEventKind {
    /// A non-fatal problem worth surfacing to the operator
    Warning {
        /// The warning text
        message: String,
    },
    /// The command has started
    Started,
    /// A line of output
    Output {
        /// Which stream the line came from
        source: LogSource,
        /// The line, without its terminator
        line: String,
    },
    /// The command has completed or was cancelled
    Ended {
        /// The error, if the command did not succeed
        error: Option<String>,
        /// Whether the governing context ended first
        cancelled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_kind_and_command() {
        let event = TraceEvent::new(
            Some("ls -la".to_string()),
            TraceEventKind::Output {
                source: LogSource::Stderr,
                line: "denied".to_string(),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["command"], "ls -la");
        assert_eq!(json["kind"]["Output"]["source"], "Stderr");
        assert_eq!(json["kind"]["Output"]["line"], "denied");
    }
}
