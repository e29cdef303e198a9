//! Short-circuiting "must succeed" operations
//!
//! [`MustEnv`] mirrors [`Env`] but fails with an [`Abort`], which only
//! [`Env::must_do`] turns back into an [`Error`]. `Abort` deliberately
//! does not implement [`std::error::Error`], so `?` cannot carry it into
//! any other error type and it cannot leave its `must_do` block by accident.

use std::fmt;
use std::path::Path;

use crate::env::Env;
use crate::error::Error;

/// Result of a [`MustEnv`] operation
pub type MustResult<T> = std::result::Result<T, Abort>;

/// The failure that ends a `must_do` block
pub struct Abort(Error);

impl Abort {
    /// The error that caused the abort
    pub fn error(&self) -> &Error {
        &self.0
    }

    pub(crate) fn into_error(self) -> Error {
        self.0
    }
}

impl From<Error> for Abort {
    fn from(err: Error) -> Self {
        Abort(err)
    }
}

impl From<std::io::Error> for Abort {
    fn from(err: std::io::Error) -> Self {
        Abort(Error::Io(err))
    }
}

impl fmt::Debug for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Abort").field(&self.0).finish()
    }
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aborted: {}", self.0)
    }
}

/// An [`Env`] whose operations abort the enclosing `must_do` block on failure
#[derive(Debug, Clone)]
pub struct MustEnv {
    env: Env,
}

impl MustEnv {
    pub(crate) fn new(env: Env) -> Self {
        Self { env }
    }

    /// The handle this view wraps
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Escalated view, see [`Env::sudo`]
    pub fn sudo(&self) -> MustEnv {
        MustEnv::new(self.env.sudo())
    }

    /// See [`Env::run_echo`]
    pub async fn run_echo<I, S>(&self, program: &str, args: I) -> MustResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.env.run_echo(program, args).await?)
    }

    /// See [`Env::run`]
    pub async fn run<I, S>(&self, program: &str, args: I) -> MustResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.env.run(program, args).await?)
    }

    /// See [`Env::read_file`]
    pub async fn read_file(&self, path: &str) -> MustResult<Vec<u8>> {
        Ok(self.env.read_file(path).await?)
    }

    /// See [`Env::write_file`]
    pub async fn write_file(&self, path: &str, data: &[u8]) -> MustResult<()> {
        Ok(self.env.write_file(path, data).await?)
    }

    /// See [`Env::append_file`]
    pub async fn append_file(&self, path: &str, data: &[u8]) -> MustResult<()> {
        Ok(self.env.append_file(path, data).await?)
    }

    /// See [`Env::upload`]
    pub async fn upload(&self, remote_path: &str, local_path: impl AsRef<Path>) -> MustResult<()> {
        Ok(self.env.upload(remote_path, local_path).await?)
    }

    /// See [`Env::download`]
    pub async fn download(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> MustResult<()> {
        Ok(self.env.download(local_path, remote_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::NoOpTracer;
    use std::sync::Arc;

    #[smol_potat::test]
    async fn test_must_do_returns_value() {
        let env = Env::local(Arc::new(NoOpTracer));
        let out = env
            .must_do(|m| async move {
                let out = m.run("echo", ["must"]).await?;
                Ok(out)
            })
            .await
            .unwrap();
        assert_eq!(out, b"must\n");
    }

    #[smol_potat::test]
    async fn test_must_do_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let marker_path = marker.to_str().unwrap().to_string();
        let env = Env::local(Arc::new(NoOpTracer));

        let err = env
            .must_do(|m| async move {
                m.run_echo("false", Vec::<String>::new()).await?;
                m.write_file(&marker_path, b"unreachable").await?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandFailed { .. }));
        assert!(!marker.exists());
    }

    #[test]
    #[should_panic(expected = "unrelated")]
    fn test_must_do_does_not_swallow_panics() {
        let env = Env::local(Arc::new(NoOpTracer));
        let fail = true;
        futures_lite::future::block_on(env.must_do(|_m| async move {
            if fail {
                panic!("unrelated");
            }
            Ok(())
        }))
        .unwrap();
    }

    #[test]
    fn test_abort_display() {
        let abort = Abort::from(Error::DriverClosed);
        assert_eq!(abort.to_string(), "aborted: driver is closed");
        assert!(matches!(abort.error(), Error::DriverClosed));
    }
}
