//! File access on the target
//!
//! Locally files are opened directly. Everywhere else, and whenever
//! privileges are escalated, file access is emulated by streaming bytes
//! through a running `cat` command, so no protocol-specific transfer
//! channel is needed.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_process::{ChildStdin, ChildStdout};
use async_trait::async_trait;
use futures_lite::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::builder::CommandBuilder;
use crate::command::{Command, TtyMode, shell_quote};
use crate::context::ExecContext;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::process::{RunningCommand, StartOptions};

/// Read, write and append access to files on the target
#[async_trait]
pub trait FileDriver: Send + Sync {
    /// Open a file for reading
    async fn open(&self, ctx: &ExecContext, path: &str) -> Result<FileReader>;

    /// Open a file for writing, truncating it
    async fn create(&self, ctx: &ExecContext, path: &str) -> Result<FileWriter>;

    /// Open a file for appending, creating it if missing
    async fn open_append(&self, ctx: &ExecContext, path: &str) -> Result<FileWriter>;
}

/// File driver that streams through `cat` commands started on a driver
#[derive(Clone)]
pub struct StreamedFileDriver {
    driver: Arc<dyn Driver>,
    builder: Arc<dyn CommandBuilder>,
}

impl StreamedFileDriver {
    /// Stream files through commands built by `builder` and started on `driver`
    pub fn new(driver: Arc<dyn Driver>, builder: Arc<dyn CommandBuilder>) -> Self {
        Self { driver, builder }
    }

    async fn start_writer(&self, ctx: &ExecContext, script: String) -> Result<FileWriter> {
        let command = self.builder.build("sh", vec!["-c".to_string(), script])?;
        let mut running = self
            .driver
            .start(
                ctx,
                &command,
                StartOptions::new().pipe_stdin().with_tty(TtyMode::Never),
            )
            .await?;

        match running.take_stdin() {
            Some(stdin) => Ok(FileWriter {
                inner: WriterInner::Command { stdin, running },
            }),
            None => Err(missing_pipe(&command, "stdin")),
        }
    }
}

impl fmt::Debug for StreamedFileDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedFileDriver")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FileDriver for StreamedFileDriver {
    async fn open(&self, ctx: &ExecContext, path: &str) -> Result<FileReader> {
        let command = self.builder.build("cat", vec![path.to_string()])?;
        let mut running = self
            .driver
            .start(
                ctx,
                &command,
                StartOptions::new().pipe_stdout().with_tty(TtyMode::Never),
            )
            .await?;

        match running.take_stdout() {
            Some(stdout) => Ok(FileReader {
                inner: ReaderInner::Command { stdout, running },
            }),
            None => Err(missing_pipe(&command, "stdout")),
        }
    }

    async fn create(&self, ctx: &ExecContext, path: &str) -> Result<FileWriter> {
        self.start_writer(ctx, format!("cat > {}", shell_quote(path)))
            .await
    }

    async fn open_append(&self, ctx: &ExecContext, path: &str) -> Result<FileWriter> {
        self.start_writer(ctx, format!("cat >> {}", shell_quote(path)))
            .await
    }
}

fn missing_pipe(command: &Command, stream: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("{stream} of `{command}` was not piped"),
    ))
}

/// A readable file on the target
///
/// Must be closed: for streamed files a failure such as a missing path is
/// only reported by [`FileReader::close`].
pub struct FileReader {
    inner: ReaderInner,
}

enum ReaderInner {
    Local(async_fs::File),
    Command {
        stdout: ChildStdout,
        running: RunningCommand,
    },
}

impl FileReader {
    pub(crate) fn local(file: async_fs::File) -> Self {
        Self {
            inner: ReaderInner::Local(file),
        }
    }

    /// Close the file, waiting for the streaming command if there is one
    pub async fn close(self) -> Result<()> {
        match self.inner {
            ReaderInner::Local(_) => Ok(()),
            ReaderInner::Command { stdout, running } => {
                drop(stdout);
                running.wait().await
            }
        }
    }
}

impl AsyncRead for FileReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.inner {
            ReaderInner::Local(file) => Pin::new(file).poll_read(cx, buf),
            ReaderInner::Command { stdout, .. } => Pin::new(stdout).poll_read(cx, buf),
        }
    }
}

impl fmt::Debug for FileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ReaderInner::Local(_) => f.debug_tuple("FileReader").field(&"local").finish(),
            ReaderInner::Command { running, .. } => {
                f.debug_tuple("FileReader").field(running).finish()
            }
        }
    }
}

/// A writable file on the target
///
/// Must be closed: only a successful [`FileWriter::close`] guarantees the
/// data reached the file.
pub struct FileWriter {
    inner: WriterInner,
}

enum WriterInner {
    Local(async_fs::File),
    Command {
        stdin: ChildStdin,
        running: RunningCommand,
    },
}

impl FileWriter {
    pub(crate) fn local(file: async_fs::File) -> Self {
        Self {
            inner: WriterInner::Local(file),
        }
    }

    /// Close the file
    ///
    /// For streamed files this signals end of input to the command and
    /// waits for it to exit. A failure to close the input is reported as
    /// [`Error::InputClose`], after the command has still been waited on.
    pub async fn close(self) -> Result<()> {
        match self.inner {
            WriterInner::Local(mut file) => {
                file.flush().await?;
                Ok(())
            }
            WriterInner::Command { mut stdin, running } => {
                let closed = stdin.close().await;
                drop(stdin);
                let command = running.command().command_line();
                let waited = running.wait().await;

                match closed {
                    Err(source) => Err(Error::InputClose { command, source }),
                    Ok(()) => waited,
                }
            }
        }
    }
}

impl AsyncWrite for FileWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.inner {
            WriterInner::Local(file) => Pin::new(file).poll_write(cx, buf),
            WriterInner::Command { stdin, .. } => Pin::new(stdin).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.inner {
            WriterInner::Local(file) => Pin::new(file).poll_flush(cx),
            WriterInner::Command { stdin, .. } => Pin::new(stdin).poll_flush(cx),
        }
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.inner {
            WriterInner::Local(file) => Pin::new(file).poll_close(cx),
            WriterInner::Command { stdin, .. } => Pin::new(stdin).poll_close(cx),
        }
    }
}

impl fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            WriterInner::Local(_) => f.debug_tuple("FileWriter").field(&"local").finish(),
            WriterInner::Command { running, .. } => {
                f.debug_tuple("FileWriter").field(running).finish()
            }
        }
    }
}
