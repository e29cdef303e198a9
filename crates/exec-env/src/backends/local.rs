//! Local process execution backend

use std::sync::Arc;

use async_trait::async_trait;

use crate::command::Command;
use crate::context::ExecContext;
use crate::driver::Driver;
use crate::error::Result;
use crate::files::{FileDriver, FileReader, FileWriter};
use crate::process::{RunningCommand, StartOptions};
use crate::tracer::Tracer;

/// Driver for executing processes on the local machine
///
/// Programs are spawned directly with their argument vector, never through
/// a shell. Terminal preferences are ignored.
#[derive(Clone)]
pub struct LocalDriver {
    tracer: Arc<dyn Tracer>,
}

impl LocalDriver {
    /// Create a local driver reporting to `tracer`
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl std::fmt::Debug for LocalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDriver").finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    async fn start(
        &self,
        ctx: &ExecContext,
        command: &Command,
        opts: StartOptions,
    ) -> Result<RunningCommand> {
        RunningCommand::spawn(ctx, command, self.tracer.clone(), command.prepare(), opts)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// File driver using the local filesystem directly
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileDriver;

#[async_trait]
impl FileDriver for LocalFileDriver {
    async fn open(&self, _ctx: &ExecContext, path: &str) -> Result<FileReader> {
        let file = async_fs::File::open(path).await?;
        Ok(FileReader::local(file))
    }

    async fn create(&self, _ctx: &ExecContext, path: &str) -> Result<FileWriter> {
        let file = async_fs::File::create(path).await?;
        Ok(FileWriter::local(file))
    }

    async fn open_append(&self, _ctx: &ExecContext, path: &str) -> Result<FileWriter> {
        let file = async_fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        Ok(FileWriter::local(file))
    }
}
