//! Tests against a real SSH server
//!
//! Enable with `--features ssh-tests` and point `EXEC_ENV_SSH_HOST` (and
//! optionally `EXEC_ENV_SSH_USER`, `EXEC_ENV_SSH_PORT`, `EXEC_ENV_SSH_KEY`)
//! at a host that accepts the credentials. Tests are skipped when no host
//! is configured.

#![cfg(all(unix, feature = "ssh-tests"))]

use std::sync::Arc;

use exec_env::backends::{HostKeyPolicy, SshAuth, SshConfig};
use exec_env::{Env, Error, LogTracer};

fn host_env() -> Option<(SshConfig, SshAuth)> {
    let host = std::env::var("EXEC_ENV_SSH_HOST").ok()?;
    let mut config = SshConfig::new(host).with_host_key_policy(HostKeyPolicy::Off);
    if let Ok(user) = std::env::var("EXEC_ENV_SSH_USER") {
        config = config.with_user(user);
    }
    if let Some(port) = std::env::var("EXEC_ENV_SSH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config = config.with_port(port);
    }
    let auth = match std::env::var("EXEC_ENV_SSH_KEY") {
        Ok(path) => SshAuth::key_pair(path, None),
        Err(_) => SshAuth::Agent,
    };
    Some((config, auth))
}

async fn connect() -> Option<Env> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let Some((config, auth)) = host_env() else {
        eprintln!("EXEC_ENV_SSH_HOST not set, skipping");
        return None;
    };
    let tracer = Arc::new(LogTracer::new(config.destination()));
    Some(Env::ssh(config, auth, tracer).await.unwrap())
}

#[smol_potat::test]
async fn test_remote_run_and_files() {
    let Some(env) = connect().await else {
        return;
    };

    env.run_echo("uname", ["-a"]).await.unwrap();

    let dir = String::from_utf8(env.run("mktemp", ["-d"]).await.unwrap()).unwrap();
    let path = format!("{}/scratch file", dir.trim());
    env.write_file(&path, b"hello").await.unwrap();
    env.append_file(&path, b" again").await.unwrap();
    assert_eq!(env.read_file(&path).await.unwrap(), b"hello again");

    env.run_echo("rm", ["-rf", dir.trim()]).await.unwrap();
    env.close().await.unwrap();
}

#[smol_potat::test]
async fn test_remote_exit_status() {
    let Some(env) = connect().await else {
        return;
    };

    let err = env.run("sh", ["-c", "exit 7"]).await.unwrap_err();
    match err {
        Error::CommandFailed { status, .. } => assert_eq!(status.code, Some(7)),
        other => panic!("unexpected error: {other:?}"),
    }
    env.close().await.unwrap();
}
