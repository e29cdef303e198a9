//! Command type and command-line rendering

use std::borrow::Cow;
use std::fmt;

/// Whether a pseudo-terminal should be allocated for a command
///
/// Only remote sessions honour this; local processes never get a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtyMode {
    /// The command does not care
    #[default]
    NoPreference,
    /// Never allocate a terminal (binary-safe streams)
    Never,
    /// Try to allocate one, continue without it on failure
    Recommended,
    /// Fail the command if a terminal cannot be allocated
    Required,
}

/// A command to be executed
///
/// Commands are immutable values produced by a
/// [`CommandBuilder`](crate::builder::CommandBuilder) for each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program to execute
    program: String,
    /// The arguments to pass to the program
    args: Vec<String>,
    /// Terminal allocation preference
    tty: TtyMode,
}

impl Command {
    /// Create a new command for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            tty: TtyMode::NoPreference,
        }
    }

    /// Append arguments to the command
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the terminal allocation preference
    pub fn with_tty(mut self, tty: TtyMode) -> Self {
        self.tty = tty;
        self
    }

    /// Get the program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the arguments
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the terminal allocation preference
    pub fn tty(&self) -> TtyMode {
        self.tty
    }

    /// Render the command as a single shell line
    ///
    /// Each argument is quoted with [`shell_quote`]; the program name is
    /// emitted as is.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        line
    }

    /// Prepare this command for local execution without a shell
    pub(crate) fn prepare(&self) -> async_process::Command {
        let mut cmd = async_process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Quote a string for safe inclusion in a POSIX shell command line
///
/// Strings without shell metacharacters are returned unchanged.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let needs_quoting = s.is_empty()
        || s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~".contains(c));

    if needs_quoting {
        Cow::Owned(format!("'{}'", s.replace('\'', "'\"'\"'")))
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("simple"), "simple");
        assert_eq!(shell_quote("-la"), "-la");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("with'quote"), "'with'\"'\"'quote'");
        assert_eq!(shell_quote("$variable"), "'$variable'");
        assert_eq!(shell_quote("path/to/file"), "path/to/file");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("cat > /tmp/x"), "'cat > /tmp/x'");
    }

    #[test]
    fn test_command_line() {
        let cmd = Command::new("ls").with_args(["-la", "/tmp"]);
        assert_eq!(cmd.command_line(), "ls -la /tmp");
        assert_eq!(cmd.to_string(), "ls -la /tmp");
        assert_eq!(cmd.tty(), TtyMode::NoPreference);
    }

    #[test]
    fn test_command_line_without_args() {
        assert_eq!(Command::new("uptime").command_line(), "uptime");
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let cmd = Command::new("echo").with_args(["hello world", "$HOME"]);
        assert_eq!(cmd.command_line(), "echo 'hello world' '$HOME'");
    }

    #[test]
    fn test_command_line_is_pure() {
        let cmd = Command::new("sh").with_args(["-c", "cat >> '/tmp/a b'"]);
        assert_eq!(cmd.command_line(), cmd.clone().command_line());
    }
}
