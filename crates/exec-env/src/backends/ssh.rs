//! SSH remote execution backend using the OpenSSH client
//!
//! One authenticated connection is held open by an OpenSSH control master.
//! Every command is a separate session multiplexed over that connection by
//! a short-lived `ssh` client process, which doubles as the session handle:
//! its exit status is the remote command's exit status, and killing it
//! tears the session down.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_process::{Command as ProcessCommand, Stdio};
use async_trait::async_trait;
use futures_lite::future;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::command::{Command, TtyMode};
use crate::context::ExecContext;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::process::{RunningCommand, StartOptions};
use crate::tracer::Tracer;

/// Environment variable carrying the secret to the askpass helper
const SECRET_ENV: &str = "EXEC_ENV_SSH_SECRET";

/// Exit status `ssh` reserves for its own failures
const SSH_FAILURE_STATUS: i32 = 255;

/// Remote command that succeeds only when stdin is a terminal
const TERMINAL_CHECK: &str = "test -t 0";

/// How to treat unknown or changed host keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Only connect to hosts already in `known_hosts`
    Strict,
    /// Record keys of new hosts, refuse changed keys
    #[default]
    AcceptNew,
    /// Accept any host key
    Off,
}

impl HostKeyPolicy {
    fn as_option(self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "StrictHostKeyChecking=yes",
            HostKeyPolicy::AcceptNew => "StrictHostKeyChecking=accept-new",
            HostKeyPolicy::Off => "StrictHostKeyChecking=no",
        }
    }
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    host: String,
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Host key verification policy
    host_key_policy: HostKeyPolicy,
    /// Connection timeout
    connect_timeout: Option<Duration>,
    /// Additional `-o` options for the master and every session
    options: Vec<String>,
    /// The `ssh` program to run
    program: PathBuf,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: None,
            options: Vec::new(),
            program: PathBuf::from("ssh"),
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the host key verification policy
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Add an `-o` option such as `ServerAliveInterval=30`
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Use a different `ssh` binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// The host being connected to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The destination string (user@host if user is specified)
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Connection options shared by the master and every session
    ///
    /// Sessions carry them too, so a session that cannot reach the master
    /// and connects on its own still honours the port and host key policy.
    fn apply_options(&self, cmd: &mut ProcessCommand) {
        cmd.arg("-o").arg(self.host_key_policy.as_option());
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(timeout) = self.connect_timeout {
            cmd.arg("-o")
                .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        for option in &self.options {
            cmd.arg("-o").arg(option);
        }
    }
}

/// Credentials used once, when the connection is established
#[derive(Clone, Default)]
pub enum SshAuth {
    /// Whatever the agent or the default identities provide
    #[default]
    Agent,
    /// A private key file, optionally protected by a passphrase
    KeyPair {
        /// Path to the private key
        path: PathBuf,
        /// Passphrase unlocking the key
        passphrase: Option<String>,
    },
    /// Password authentication
    Password(String),
}

impl SshAuth {
    /// Authenticate with a private key
    pub fn key_pair(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self::KeyPair {
            path: path.into(),
            passphrase: passphrase.filter(|p| !p.is_empty()),
        }
    }

    /// Authenticate with a password
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    fn secret(&self) -> Option<&str> {
        match self {
            SshAuth::Agent => None,
            SshAuth::KeyPair { passphrase, .. } => passphrase.as_deref(),
            SshAuth::Password(password) => Some(password),
        }
    }

    /// Add the arguments and environment the master needs to authenticate
    async fn configure(&self, master: &mut ProcessCommand, control_dir: &Path) -> Result<()> {
        match self {
            SshAuth::Agent => {}
            SshAuth::KeyPair { path, .. } => {
                if async_fs::metadata(path).await.is_err() {
                    return Err(Error::KeyNotFound {
                        path: path.display().to_string(),
                    });
                }
                master
                    .arg("-i")
                    .arg(path)
                    .arg("-o")
                    .arg("IdentitiesOnly=yes")
                    .arg("-o")
                    .arg("PasswordAuthentication=no");
            }
            SshAuth::Password(_) => {
                master
                    .arg("-o")
                    .arg("PreferredAuthentications=password,keyboard-interactive")
                    .arg("-o")
                    .arg("PubkeyAuthentication=no")
                    .arg("-o")
                    .arg("NumberOfPasswordPrompts=1");
            }
        }

        match self.secret() {
            Some(secret) => {
                let askpass = write_askpass(control_dir).await?;
                master
                    .env("SSH_ASKPASS", askpass)
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(SECRET_ENV, secret);
            }
            None => {
                master.arg("-o").arg("BatchMode=yes");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Agent => f.write_str("Agent"),
            SshAuth::KeyPair { path, passphrase } => f
                .debug_struct("KeyPair")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            SshAuth::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Write a helper that prints the secret from the master's environment
async fn write_askpass(control_dir: &Path) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = control_dir.join("askpass");
    async_fs::write(&path, format!("#!/bin/sh\nprintf '%s\\n' \"${SECRET_ENV}\"\n"))
        .await
        .map_err(|e| Error::Authentication {
            reason: format!("cannot write askpass helper: {e}"),
        })?;
    async_fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).await?;
    Ok(path)
}

/// Driver executing commands on a remote host over one SSH connection
pub struct SshDriver {
    config: SshConfig,
    control_path: PathBuf,
    control_dir: Mutex<Option<TempDir>>,
    closed: AtomicBool,
    terminal_granted: OnceLock<bool>,
    tracer: Arc<dyn Tracer>,
}

impl SshDriver {
    /// Establish the connection and authenticate
    pub async fn connect(
        config: SshConfig,
        auth: SshAuth,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix(".exec-env-ssh-")
            .tempdir()
            .map_err(|e| Error::Connection {
                host: config.host.clone(),
                reason: format!("cannot create control directory: {e}"),
            })?;
        let control_path = control_dir.path().join("master");
        let log_path = control_dir.path().join("master.log");

        info!(host = %config.host, port = ?config.port, user = ?config.user, "connecting to SSH");

        let mut master = ProcessCommand::new(&config.program);
        master
            .arg("-M")
            .arg("-f")
            .arg("-N")
            .arg("-S")
            .arg(&control_path)
            .arg("-E")
            .arg(&log_path)
            .arg("-o")
            .arg("ControlPersist=yes");
        config.apply_options(&mut master);
        auth.configure(&mut master, control_dir.path()).await?;
        master.arg(config.destination());

        // ssh keeps inherited stdio open after forking, so nothing may be piped
        master
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = master.status().await.map_err(|e| Error::Connection {
            host: config.host.clone(),
            reason: format!("cannot run {}: {e}", config.program.display()),
        })?;

        if !status.success() {
            let log = async_fs::read_to_string(&log_path).await.unwrap_or_default();
            let reason = match log.trim() {
                "" => format!("ssh exited with {}", status),
                log => log.to_string(),
            };
            return Err(Error::Connection {
                host: config.host.clone(),
                reason,
            });
        }

        info!(host = %config.host, "SSH connected and authenticated");

        Ok(Self {
            config,
            control_path,
            control_dir: Mutex::new(Some(control_dir)),
            closed: AtomicBool::new(false),
            terminal_granted: OnceLock::new(),
            tracer,
        })
    }

    /// The configuration this driver connected with
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::DriverClosed)
        } else {
            Ok(())
        }
    }

    /// An `ssh` invocation that opens a session over the control master
    fn session_command(&self, terminal: bool) -> ProcessCommand {
        let mut ssh = ProcessCommand::new(&self.config.program);
        ssh.arg("-S")
            .arg(&self.control_path)
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes");
        self.config.apply_options(&mut ssh);
        ssh.arg(if terminal { "-tt" } else { "-T" });
        ssh.arg(self.config.destination());
        ssh
    }

    /// Check whether the server grants a terminal to a session
    ///
    /// The answer holds for the whole connection and is asked only once.
    async fn check_terminal(&self, ctx: &ExecContext) -> Result<bool> {
        if let Some(granted) = self.terminal_granted.get() {
            return Ok(*granted);
        }

        let mut check = self
            .session_command(true)
            .arg(TERMINAL_CHECK)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::SpawnFailed {
                command: TERMINAL_CHECK.to_string(),
                source,
            })?;

        let status = future::or(async { Ok(check.status().await) }, async {
            Err(ctx.done().await)
        })
        .await;
        let status = match status {
            Ok(status) => status.map_err(|source| Error::Wait {
                command: TERMINAL_CHECK.to_string(),
                source,
            })?,
            Err(reason) => return Err(reason.into()),
        };

        let granted = match status.code() {
            Some(0) => true,
            Some(SSH_FAILURE_STATUS) | None => {
                return Err(Error::Connection {
                    host: self.config.host.clone(),
                    reason: format!("terminal check failed with {}", status),
                });
            }
            Some(_) => false,
        };
        debug!(host = %self.config.host, granted, "terminal check finished");
        let _ = self.terminal_granted.set(granted);
        Ok(granted)
    }

    /// Apply the terminal allocation policy, returning whether to use a terminal
    async fn request_terminal(
        &self,
        ctx: &ExecContext,
        mode: TtyMode,
        command: &Command,
    ) -> Result<bool> {
        match mode {
            TtyMode::NoPreference | TtyMode::Never => Ok(false),
            TtyMode::Recommended | TtyMode::Required => {
                if self.check_terminal(ctx).await? {
                    return Ok(true);
                }
                if mode == TtyMode::Required {
                    return Err(Error::TerminalUnavailable {
                        command: command.command_line(),
                    });
                }
                self.tracer.warn(&format!(
                    "cannot allocate a terminal for `{command}`, continuing without one"
                ));
                Ok(false)
            }
        }
    }

    fn exit_master(&self) -> ProcessCommand {
        let mut ssh = ProcessCommand::new(&self.config.program);
        ssh.arg("-S")
            .arg(&self.control_path)
            .arg("-O")
            .arg("exit")
            .arg(self.config.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        ssh
    }

    fn take_control_dir(&self) -> Option<TempDir> {
        match self.control_dir.lock() {
            Ok(mut dir) => dir.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl fmt::Debug for SshDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshDriver")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for SshDriver {
    fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    async fn start(
        &self,
        ctx: &ExecContext,
        command: &Command,
        opts: StartOptions,
    ) -> Result<RunningCommand> {
        self.ensure_open()?;
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }

        let terminal = self
            .request_terminal(ctx, opts.effective_tty(command), command)
            .await?;

        let mut session = self.session_command(terminal);
        session.arg(command.command_line());
        debug!(host = %self.config.host, terminal, command = %command, "opening session");

        RunningCommand::spawn(ctx, command, self.tracer.clone(), session, opts)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let status = self.exit_master().status().await;
        drop(self.take_control_dir());

        match status {
            Ok(status) if status.success() => {
                info!(host = %self.config.host, "SSH disconnected");
                Ok(())
            }
            Ok(status) => Err(Error::Connection {
                host: self.config.host.clone(),
                reason: format!("control master did not exit cleanly: {}", status),
            }),
            Err(e) => Err(Error::Connection {
                host: self.config.host.clone(),
                reason: format!("cannot stop control master: {e}"),
            }),
        }
    }
}

impl Drop for SshDriver {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(host = %self.config.host, "SSH driver dropped without close");

        let control_dir = self.take_control_dir();
        match self.exit_master().spawn() {
            Ok(mut exit) => {
                // The control socket lives in the directory, which must outlast
                // the exit request
                let spawned = std::thread::Builder::new()
                    .name("exec-env-ssh-exit".to_string())
                    .spawn(move || {
                        let _ = futures_lite::future::block_on(exit.status());
                        drop(control_dir);
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "cannot wait for control master exit");
                }
            }
            Err(e) => {
                warn!(host = %self.config.host, error = %e, "cannot stop control master");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config() {
        let config = SshConfig::new("example.com")
            .with_user("alice")
            .with_port(2222)
            .with_option("ServerAliveInterval=30");

        assert_eq!(config.destination(), "alice@example.com");
        assert_eq!(config.host(), "example.com");
        assert_eq!(config.port, Some(2222));
        assert_eq!(config.options, vec!["ServerAliveInterval=30"]);
        assert_eq!(config.host_key_policy, HostKeyPolicy::AcceptNew);
    }

    #[test]
    fn test_destination_without_user() {
        assert_eq!(SshConfig::new("10.0.0.5").destination(), "10.0.0.5");
    }

    #[test]
    fn test_host_key_policy_options() {
        assert_eq!(HostKeyPolicy::Strict.as_option(), "StrictHostKeyChecking=yes");
        assert_eq!(HostKeyPolicy::Off.as_option(), "StrictHostKeyChecking=no");
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let password = format!("{:?}", SshAuth::password("hunter2"));
        let key = format!("{:?}", SshAuth::key_pair("/keys/id", Some("s3cret".to_string())));
        assert!(!password.contains("hunter2"));
        assert!(!key.contains("s3cret"));
        assert!(key.contains("/keys/id"));
    }

    #[test]
    fn test_empty_passphrase_is_no_secret() {
        assert_eq!(SshAuth::key_pair("/keys/id", Some(String::new())).secret(), None);
        assert_eq!(SshAuth::password("pw").secret(), Some("pw"));
        assert_eq!(SshAuth::Agent.secret(), None);
    }

    #[smol_potat::test]
    async fn test_missing_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut master = ProcessCommand::new("ssh");
        let auth = SshAuth::key_pair("/nonexistent/id_ed25519", None);
        let err = auth.configure(&mut master, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    #[smol_potat::test]
    async fn test_askpass_helper_prints_secret() {
        let dir = tempfile::tempdir().unwrap();
        let askpass = write_askpass(dir.path()).await.unwrap();

        let output = ProcessCommand::new(&askpass)
            .env(SECRET_ENV, "pa ss")
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout, b"pa ss\n");
    }
}
