//! Running commands and their lifecycle

use std::fmt;
use std::sync::Arc;

use async_process::{Child, ChildStderr, ChildStdin, ChildStdout, Stdio};
use futures_lite::future;

use crate::command::{Command, TtyMode};
use crate::context::{ContextError, ExecContext};
use crate::error::{Error, Result};
use crate::tracer::Tracer;

/// Which streams to pipe when starting a command
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Pipe standard input
    pub stdin: bool,
    /// Pipe standard output
    pub stdout: bool,
    /// Pipe standard error
    pub stderr: bool,
    /// Terminal preference overriding the command's own
    pub tty: Option<TtyMode>,
}

impl StartOptions {
    /// No pipes, no terminal override
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipe standard input
    pub fn pipe_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    /// Pipe standard output
    pub fn pipe_stdout(mut self) -> Self {
        self.stdout = true;
        self
    }

    /// Pipe standard error
    pub fn pipe_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    /// Override the command's terminal preference
    pub fn with_tty(mut self, tty: TtyMode) -> Self {
        self.tty = Some(tty);
        self
    }

    /// The terminal mode in effect for `command`
    pub fn effective_tty(&self, command: &Command) -> TtyMode {
        self.tty.unwrap_or(command.tty())
    }
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
            #[cfg(not(unix))]
            signal: None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// A live handle to one in-flight command
///
/// Created by [`Driver::start`](crate::driver::Driver::start). The command
/// ends either when its process exits or when the governing context ends,
/// whichever happens first; the tracer hears about it exactly once.
/// Dropping the handle without waiting kills the process.
pub struct RunningCommand {
    ctx: ExecContext,
    command: Command,
    tracer: Arc<dyn Tracer>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled(ContextError),
}

impl RunningCommand {
    /// Spawn `process` on behalf of `command` and report the start
    ///
    /// Streams that are not piped are connected to the null device.
    pub(crate) fn spawn(
        ctx: &ExecContext,
        command: &Command,
        tracer: Arc<dyn Tracer>,
        mut process: async_process::Command,
        opts: StartOptions,
    ) -> Result<Self> {
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }

        process.stdin(stdio(opts.stdin));
        process.stdout(stdio(opts.stdout));
        process.stderr(stdio(opts.stderr));

        let mut child = process.spawn().map_err(|source| Error::SpawnFailed {
            command: command.command_line(),
            source,
        })?;

        tracer.command_started(command);

        Ok(Self {
            ctx: ctx.clone(),
            command: command.clone(),
            tracer,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child: Some(child),
        })
    }

    /// The command this handle is running
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The local process ID (the session client for remote commands)
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Take the piped standard input
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the piped standard output
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the piped standard error
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the command to complete or for its context to end
    ///
    /// Returns `Ok(())` on a successful exit, [`Error::CommandFailed`] on a
    /// non-zero exit, and the context's error if the context ended first.
    /// Standard input, if still held, is closed before waiting.
    pub async fn wait(mut self) -> Result<()> {
        drop(self.stdin.take());

        // The child stays in `self` until an outcome is chosen, so dropping
        // this future mid-race still kills it and reports through `Drop`
        let ctx = self.ctx.clone();
        let outcome = match self.child.as_mut() {
            Some(child) => {
                future::or(async { Outcome::Exited(child.status().await) }, async {
                    Outcome::Cancelled(ctx.done().await)
                })
                .await
            }
            None => return Ok(()),
        };
        let child = self.child.take();

        match outcome {
            Outcome::Exited(status) => {
                let result = match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => Err(Error::CommandFailed {
                        command: self.command.command_line(),
                        status: status.into(),
                    }),
                    Err(source) => Err(Error::Wait {
                        command: self.command.command_line(),
                        source,
                    }),
                };
                self.tracer
                    .command_ended(&self.command, result.as_ref().err(), false);
                result
            }
            Outcome::Cancelled(reason) => {
                // Best-effort release; async-process reaps the dropped child
                if let Some(mut child) = child {
                    let _ = child.kill();
                }

                let err = Error::from(reason);
                self.tracer.command_ended(&self.command, Some(&err), true);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for RunningCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningCommand")
            .field("command", &self.command.command_line())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let err = Error::Abandoned {
                command: self.command.command_line(),
            };
            self.tracer.command_ended(&self.command, Some(&err), true);
        }
    }
}

fn stdio(piped: bool) -> Stdio {
    if piped {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}
