//! Error types for command execution

use thiserror::Error;

use crate::context::ContextError;
use crate::process::ExitStatus;

/// Unified error type for the execution engine
#[derive(Error, Debug)]
pub enum Error {
    /// A command builder refused to build a command
    #[error("failed to build command `{program}`: {reason}")]
    Build {
        /// The program that was being built
        program: String,
        /// Why the builder refused
        reason: String,
    },

    /// Failed to spawn a process or session
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        /// The rendered command line
        command: String,
        /// The underlying spawn failure
        #[source]
        source: std::io::Error,
    },

    /// Failed to wait for a process or session
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        /// The rendered command line
        command: String,
        /// The underlying wait failure
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully
    #[error("`{command}` failed with {status}")]
    CommandFailed {
        /// The rendered command line
        command: String,
        /// How the command exited
        status: ExitStatus,
    },

    /// The governing execution context ended before the command did
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A running command was dropped without being waited on
    #[error("`{command}` was dropped before completion")]
    Abandoned {
        /// The rendered command line
        command: String,
    },

    /// A terminal was required but could not be allocated
    #[error("terminal required but not available for `{command}`")]
    TerminalUnavailable {
        /// The rendered command line
        command: String,
    },

    /// Closing the input stream of a streaming command failed
    #[error("failed to close input of `{command}`: {source}")]
    InputClose {
        /// The rendered command line
        command: String,
        /// The underlying close failure
        #[source]
        source: std::io::Error,
    },

    /// The driver has already been closed
    #[error("driver is closed")]
    DriverClosed,

    /// SSH connection failed
    #[cfg(feature = "ssh")]
    #[error("SSH connection failed to {host}: {reason}")]
    Connection {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// SSH key not found
    #[cfg(feature = "ssh")]
    #[error("SSH key not found: {path}")]
    KeyNotFound {
        /// The path where the SSH key was expected to be found
        path: String,
    },

    /// Credentials could not be prepared
    #[cfg(feature = "ssh")]
    #[error("SSH authentication failed: {reason}")]
    Authentication {
        /// What went wrong
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a build error
    pub fn build(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Build {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error is the governing context ending
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Context(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
