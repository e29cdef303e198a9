//! Shared test utilities

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A stand-in for the `ssh` client that runs sessions on the local machine
///
/// Control master start and stop requests succeed immediately. Sessions run
/// their command line with `/bin/sh`. A terminal is only granted when the
/// `FakeTty=yes` option is passed; `FakeTty=hang` makes the terminal check
/// never answer. Sessions given a port record it with the host key
/// policy. Stop requests record whether the control socket directory
/// still exists. Every invocation is appended to the log.
pub struct FakeSsh {
    /// Path of the fake `ssh` program
    pub program: PathBuf,
    log: PathBuf,
}

impl FakeSsh {
    /// Install the fake client in `dir`
    pub fn install(dir: &Path) -> Self {
        Self::install_with_master(dir, "exit 0")
    }

    /// Install the fake client with a custom control master script
    ///
    /// The script runs in place of the master; `$errlog` is the path given
    /// with `-E`.
    pub fn install_with_master(dir: &Path, master: &str) -> Self {
        let program = dir.join("ssh");
        let log = dir.join("ssh.log");
        let script = format!(
            r#"#!/bin/sh
log='{log}'
master=no
control=
errlog=/dev/null
sock=
port=
hostkey=
tty=no
fake_tty=no
dest=
cmd=
while [ $# -gt 0 ]; do
  case "$1" in
    -M) master=yes ;;
    -O) control="$2"; shift ;;
    -E) errlog="$2"; shift ;;
    -tt) tty=yes ;;
    -o)
      case "$2" in
        FakeTty=*) fake_tty="${{2#FakeTty=}}" ;;
        StrictHostKeyChecking=*) hostkey="$2" ;;
      esac
      shift ;;
    -S) sock="$2"; shift ;;
    -p) port="$2"; shift ;;
    -i) shift ;;
    -*) ;;
    *) if [ -z "$dest" ]; then dest="$1"; else cmd="$1"; fi ;;
  esac
  shift
done
if [ "$master" = yes ]; then
  echo "master $dest" >> "$log"
  {master}
fi
if [ -n "$control" ]; then
  sleep 0.05
  if [ -d "$(dirname "$sock")" ]; then
    echo "control-dir present" >> "$log"
  else
    echo "control-dir gone" >> "$log"
  fi
  echo "control $control" >> "$log"
  exit 0
fi
if [ "$cmd" = "test -t 0" ]; then
  echo "tty-check tty=$tty" >> "$log"
  [ "$fake_tty" = hang ] && exec sleep 10
  [ "$fake_tty" = yes ] && exit 0
  exit 1
fi
[ -n "$port" ] && echo "session-options port=$port $hostkey" >> "$log"
echo "session tty=$tty $dest $cmd" >> "$log"
exec /bin/sh -c "$cmd"
"#,
            log = log.display(),
        );
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { program, log }
    }

    /// Every recorded invocation, one per line
    pub fn log(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Wait up to five seconds for a log line equal to `line`
    pub fn wait_for(&self, line: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.log().iter().any(|l| l == line) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }
}
