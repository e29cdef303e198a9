//! Observers of command lifecycle and output
//!
//! A [`Tracer`] is injected into every driver and running command. It is a
//! pure observer: nothing it does can change how a command executes.

use async_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::command::Command;
use crate::error::Error;
use crate::event::{LogSource, TraceEvent, TraceEventKind};

/// Observer notified at command start, per output line, and at completion
///
/// For a single running command, `command_started` precedes every
/// `echo_line`, which precede the single `command_ended`.
pub trait Tracer: Send + Sync {
    /// Surface a non-fatal problem
    fn warn(&self, message: &str);

    /// A command has been launched
    fn command_started(&self, command: &Command);

    /// A command has completed (`cancelled == false`) or its context ended first
    fn command_ended(&self, command: &Command, error: Option<&Error>, cancelled: bool);

    /// A line of output was read from a command
    fn echo_line(&self, command: &Command, line: &str, source: LogSource);
}

/// Tracer that writes prefixed lines through `tracing`
#[derive(Debug, Clone)]
pub struct LogTracer {
    prefix: String,
}

impl LogTracer {
    /// Create a tracer tagging every line with `prefix` (e.g. `user@host`)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The tag used on every line
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Tracer for LogTracer {
    fn warn(&self, message: &str) {
        warn!("[{}] WARN  {}", self.prefix, message);
    }

    fn command_started(&self, command: &Command) {
        info!("[{}] START {}", self.prefix, command);
    }

    fn command_ended(&self, command: &Command, error: Option<&Error>, cancelled: bool) {
        match error {
            None => info!("[{}] DONE  {}", self.prefix, command),
            Some(_) if cancelled => warn!("[{}] CANCL {}", self.prefix, command),
            Some(err) => {
                error!("[{}] ERR   {}", self.prefix, command);
                error!("[{}] ERR   .. {}", self.prefix, err);
            }
        }
    }

    fn echo_line(&self, _command: &Command, line: &str, source: LogSource) {
        match source {
            LogSource::Stdout => info!("[{}] . OUT {}", self.prefix, line),
            LogSource::Stderr => info!("[{}] . ERR {}", self.prefix, line),
        }
    }
}

/// A tracer that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTracer;

impl Tracer for NoOpTracer {
    fn warn(&self, _message: &str) {}

    fn command_started(&self, _command: &Command) {}

    fn command_ended(&self, _command: &Command, _error: Option<&Error>, _cancelled: bool) {}

    fn echo_line(&self, _command: &Command, _line: &str, _source: LogSource) {}
}

/// Tracer that emits structured [`TraceEvent`]s on an unbounded channel
///
/// Events are dropped silently once every receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelTracer {
    tx: Sender<TraceEvent>,
}

impl ChannelTracer {
    /// Create a tracer and the receiving end of its event channel
    pub fn new() -> (Self, Receiver<TraceEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    fn emit(&self, command: Option<&Command>, kind: TraceEventKind) {
        let _ = self
            .tx
            .try_send(TraceEvent::new(command.map(Command::command_line), kind));
    }
}

impl Tracer for ChannelTracer {
    fn warn(&self, message: &str) {
        self.emit(
            None,
            TraceEventKind::Warning {
                message: message.to_string(),
            },
        );
    }

    fn command_started(&self, command: &Command) {
        self.emit(Some(command), TraceEventKind::Started);
    }

    fn command_ended(&self, command: &Command, error: Option<&Error>, cancelled: bool) {
        self.emit(
            Some(command),
            TraceEventKind::Ended {
                error: error.map(ToString::to_string),
                cancelled,
            },
        );
    }

    fn echo_line(&self, command: &Command, line: &str, source: LogSource) {
        self.emit(
            Some(command),
            TraceEventKind::Output {
                source,
                line: line.to_string(),
            },
        );
    }
}
