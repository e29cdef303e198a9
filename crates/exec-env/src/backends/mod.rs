//! Built-in drivers
//!
//! The local driver spawns processes directly. The SSH driver runs them on
//! a remote host over a multiplexed OpenSSH connection.

pub mod local;
pub use local::{LocalDriver, LocalFileDriver};

#[cfg(all(unix, feature = "ssh"))]
pub mod ssh;
#[cfg(all(unix, feature = "ssh"))]
pub use ssh::{HostKeyPolicy, SshAuth, SshConfig, SshDriver};
