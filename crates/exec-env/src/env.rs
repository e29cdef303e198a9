//! Execution environment handles
//!
//! An [`Env`] is what automation code is written against. It bundles a
//! driver, a command builder and a file driver that agree with each other,
//! and it never changes: deriving an escalated or differently-governed
//! handle produces a new value sharing the same driver.

use std::path::Path;
use std::sync::Arc;

use futures_lite::io::{self, AsyncReadExt, AsyncWriteExt};

use crate::backends::local::{LocalDriver, LocalFileDriver};
use crate::builder::{CommandBuilder, EscalatingBuilder, PlainBuilder};
use crate::context::ExecContext;
use crate::driver::Driver;
use crate::error::Result;
use crate::files::{FileDriver, FileReader, FileWriter, StreamedFileDriver};
use crate::must::{Abort, MustEnv, MustResult};
use crate::tracer::Tracer;

#[cfg(all(unix, feature = "ssh"))]
use crate::backends::ssh::{SshAuth, SshConfig, SshDriver};

/// An execution environment: a target machine and the identity commands run as
#[derive(Clone)]
pub struct Env {
    driver: Arc<dyn Driver>,
    builder: Arc<dyn CommandBuilder>,
    files: Arc<dyn FileDriver>,
    ctx: ExecContext,
}

impl Env {
    /// An environment on the local machine
    pub fn local(tracer: Arc<dyn Tracer>) -> Self {
        Self::from_parts(
            Arc::new(LocalDriver::new(tracer)),
            Arc::new(PlainBuilder),
            Arc::new(LocalFileDriver),
        )
    }

    /// An environment on a remote host reached over SSH
    ///
    /// Files are transferred by streaming through `cat` on the remote host.
    #[cfg(all(unix, feature = "ssh"))]
    pub async fn ssh(config: SshConfig, auth: SshAuth, tracer: Arc<dyn Tracer>) -> Result<Self> {
        let driver: Arc<dyn Driver> = Arc::new(SshDriver::connect(config, auth, tracer).await?);
        let builder: Arc<dyn CommandBuilder> = Arc::new(PlainBuilder);
        let files = Arc::new(StreamedFileDriver::new(driver.clone(), builder.clone()));
        Ok(Self::from_parts(driver, builder, files))
    }

    /// Assemble an environment from its parts
    ///
    /// The file driver must target the same machine as the driver.
    pub fn from_parts(
        driver: Arc<dyn Driver>,
        builder: Arc<dyn CommandBuilder>,
        files: Arc<dyn FileDriver>,
    ) -> Self {
        Self {
            driver,
            builder,
            files,
            ctx: ExecContext::background(),
        }
    }

    /// The driver commands run on
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The builder commands are constructed with
    pub fn builder(&self) -> &Arc<dyn CommandBuilder> {
        &self.builder
    }

    /// The context governing this handle's operations
    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// A handle whose operations are governed by `ctx`
    pub fn with_context(&self, ctx: ExecContext) -> Self {
        Self {
            ctx,
            ..self.clone()
        }
    }

    /// A handle that runs commands and transfers files through `sudo`
    pub fn sudo(&self) -> Self {
        self.escalate(EscalatingBuilder::new(self.builder.clone()))
    }

    /// A handle that runs commands and transfers files through `program`
    pub fn escalate_with(&self, program: impl Into<String>) -> Self {
        self.escalate(EscalatingBuilder::with_program(
            self.builder.clone(),
            program,
        ))
    }

    fn escalate(&self, builder: EscalatingBuilder) -> Self {
        let builder: Arc<dyn CommandBuilder> = Arc::new(builder);
        Self {
            driver: self.driver.clone(),
            files: Arc::new(StreamedFileDriver::new(
                self.driver.clone(),
                builder.clone(),
            )),
            builder,
            ctx: self.ctx.clone(),
        }
    }

    /// Run a command, echoing its output to the tracer
    pub async fn run_echo<I, S>(&self, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self
            .builder
            .build(program, args.into_iter().map(Into::into).collect())?;
        self.driver.run_echo(&self.ctx, &command).await
    }

    /// Run a command and return its standard output
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self
            .builder
            .build(program, args.into_iter().map(Into::into).collect())?;
        self.driver.run(&self.ctx, &command).await
    }

    /// Open a file for reading; the reader must be closed
    pub async fn open(&self, path: &str) -> Result<FileReader> {
        self.files.open(&self.ctx, path).await
    }

    /// Open a file for writing, truncating it; the writer must be closed
    pub async fn create(&self, path: &str) -> Result<FileWriter> {
        self.files.create(&self.ctx, path).await
    }

    /// Open a file for appending; the writer must be closed
    pub async fn open_append(&self, path: &str) -> Result<FileWriter> {
        self.files.open_append(&self.ctx, path).await
    }

    /// Read a whole file
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.open(path).await?;
        let mut contents = Vec::new();
        if let Err(e) = reader.read_to_end(&mut contents).await {
            let _ = reader.close().await;
            return Err(e.into());
        }
        reader.close().await?;
        Ok(contents)
    }

    /// Write a whole file, replacing any existing contents
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let writer = self.create(path).await?;
        write_and_close(writer, data).await
    }

    /// Append to a file, creating it if missing
    pub async fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let writer = self.open_append(path).await?;
        write_and_close(writer, data).await
    }

    /// Copy a local file to `remote_path` on the target
    pub async fn upload(&self, remote_path: &str, local_path: impl AsRef<Path>) -> Result<()> {
        let local = async_fs::File::open(local_path.as_ref()).await?;
        let mut writer = self.create(remote_path).await?;
        if let Err(e) = io::copy(local, &mut writer).await {
            let _ = writer.close().await;
            return Err(e.into());
        }
        writer.close().await
    }

    /// Copy `remote_path` on the target to a local file
    pub async fn download(&self, local_path: impl AsRef<Path>, remote_path: &str) -> Result<()> {
        let mut reader = self.open(remote_path).await?;
        let copied = async {
            let mut local = async_fs::File::create(local_path.as_ref()).await?;
            io::copy(&mut reader, &mut local).await?;
            local.flush().await
        }
        .await;

        match copied {
            Ok(()) => reader.close().await,
            Err(e) => {
                let _ = reader.close().await;
                Err(e.into())
            }
        }
    }

    /// A view of this handle whose operations abort a [`Env::must_do`] block
    pub fn must(&self) -> MustEnv {
        MustEnv::new(self.clone())
    }

    /// Run a block of operations, stopping at the first failure
    ///
    /// Inside the block every [`MustEnv`] operation returns a
    /// [`MustResult`], so `?` ends the block at the first failure. The
    /// failure is returned here as an ordinary error. Panics are not
    /// intercepted.
    pub async fn must_do<F, Fut, T>(&self, block: F) -> Result<T>
    where
        F: FnOnce(MustEnv) -> Fut,
        Fut: Future<Output = MustResult<T>>,
    {
        block(self.must()).await.map_err(Abort::into_error)
    }

    /// Close the underlying connection
    ///
    /// Every handle sharing the driver becomes unusable.
    pub async fn close(&self) -> Result<()> {
        self.driver.close().await
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

async fn write_and_close(mut writer: FileWriter, data: &[u8]) -> Result<()> {
    if let Err(e) = writer.write_all(data).await {
        let _ = writer.close().await;
        return Err(e.into());
    }
    writer.close().await
}
