//! Runtime-agnostic command execution environments
//!
//! This crate runs commands and moves files on a target machine, either
//! the local one or a remote host reached over SSH, optionally with
//! escalated privileges. Automation code is written against [`Env`];
//! the lower layers ([`Driver`], [`CommandBuilder`], [`FileDriver`]) can be
//! used directly or replaced with custom implementations.

#![warn(missing_docs)]

pub mod backends;
pub mod builder;
pub mod command;
pub mod context;
pub mod driver;
pub mod env;
pub mod error;
pub mod event;
pub mod files;
pub mod must;
pub mod process;
pub mod tracer;

pub use builder::{CommandBuilder, EscalatingBuilder, PlainBuilder};
pub use command::{Command, TtyMode};
pub use context::{ContextError, ExecContext};
pub use driver::Driver;
pub use env::Env;
pub use error::{Error, Result};
pub use event::{LogSource, TraceEvent, TraceEventKind};
pub use files::{FileDriver, FileReader, FileWriter, StreamedFileDriver};
pub use must::{Abort, MustEnv, MustResult};
pub use process::{ExitStatus, RunningCommand, StartOptions};
pub use tracer::{ChannelTracer, LogTracer, NoOpTracer, Tracer};
