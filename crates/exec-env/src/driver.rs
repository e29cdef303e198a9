//! Driver trait for executing commands against one target

use std::sync::Arc;

use async_trait::async_trait;
use futures_lite::future;
use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::command::Command;
use crate::context::ExecContext;
use crate::error::Result;
use crate::event::LogSource;
use crate::process::{RunningCommand, StartOptions};
use crate::tracer::Tracer;

/// Execution backend bound to one target
///
/// A driver is shared by every handle derived from the same session and may
/// have several commands in flight; each command gets its own process or
/// session.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The tracer notified about every command this driver starts
    fn tracer(&self) -> &Arc<dyn Tracer>;

    /// Start a command without waiting for it
    async fn start(
        &self,
        ctx: &ExecContext,
        command: &Command,
        opts: StartOptions,
    ) -> Result<RunningCommand>;

    /// Run a command to completion, capturing its standard output
    async fn run(&self, ctx: &ExecContext, command: &Command) -> Result<Vec<u8>> {
        let mut running = self
            .start(ctx, command, StartOptions::new().pipe_stdout())
            .await?;

        // A child of the command may keep the pipe open, so the read must
        // not outlive the context
        let mut output = Vec::new();
        let read = match running.take_stdout() {
            Some(mut stdout) => {
                future::or(
                    async { stdout.read_to_end(&mut output).await.map(|_| ()) },
                    async {
                        ctx.done().await;
                        Ok(())
                    },
                )
                .await
            }
            None => Ok(()),
        };

        running.wait().await?;
        read?;
        Ok(output)
    }

    /// Run a command while echoing its output to the tracer line by line
    ///
    /// Returns only after both output streams are drained and the command
    /// has completed, or as soon as the context ends.
    async fn run_echo(&self, ctx: &ExecContext, command: &Command) -> Result<()> {
        let mut running = self
            .start(ctx, command, StartOptions::new().pipe_stdout().pipe_stderr())
            .await?;

        let tracer = self.tracer().as_ref();
        let stdout = running.take_stdout();
        let stderr = running.take_stderr();

        future::or(
            async {
                futures::join!(
                    echo_lines(tracer, command, stdout, LogSource::Stdout),
                    echo_lines(tracer, command, stderr, LogSource::Stderr),
                );
            },
            async {
                ctx.done().await;
            },
        )
        .await;

        running.wait().await
    }

    /// Release the connection to the target
    async fn close(&self) -> Result<()>;
}

/// Forward every line of `stream` to the tracer until end of stream
///
/// A read error ends the drain early; the command's exit is what decides
/// success.
pub(crate) async fn echo_lines<R>(
    tracer: &dyn Tracer,
    command: &Command,
    stream: Option<R>,
    source: LogSource,
) where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches('\n').trim_end_matches('\r');
                tracer.echo_line(command, line, source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceEventKind;
    use crate::tracer::ChannelTracer;

    #[smol_potat::test]
    async fn test_echo_lines_strips_terminators() {
        let (tracer, events) = ChannelTracer::new();
        let cmd = Command::new("fake");
        let input: &[u8] = b"one\r\ntwo\n\xffthree";

        echo_lines(&tracer, &cmd, Some(input), LogSource::Stdout).await;

        let lines: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|e| match e.kind {
                TraceEventKind::Output { line, .. } => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["one", "two", "\u{fffd}three"]);
    }

    #[smol_potat::test]
    async fn test_echo_lines_without_stream() {
        let (tracer, events) = ChannelTracer::new();
        echo_lines::<&[u8]>(&tracer, &Command::new("fake"), None, LogSource::Stderr).await;
        assert!(events.try_recv().is_err());
    }
}
