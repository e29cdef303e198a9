//! Command builders: strategies that construct and decorate commands

use std::fmt;
use std::sync::Arc;

use crate::command::{Command, TtyMode};
use crate::error::Result;

/// Default privilege escalation program
pub const DEFAULT_ESCALATION_PROGRAM: &str = "sudo";

/// Strategy that turns a program and its arguments into a [`Command`]
///
/// Builders compose by delegation, which lets privilege escalation be
/// injected without the caller knowing about it.
pub trait CommandBuilder: Send + Sync + fmt::Debug {
    /// Build a command for the given program and arguments
    fn build(&self, program: &str, args: Vec<String>) -> Result<Command>;

    /// Get a description of this builder for debugging
    fn describe(&self) -> String;
}

/// Pass-through builder
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBuilder;

impl CommandBuilder for PlainBuilder {
    fn build(&self, program: &str, args: Vec<String>) -> Result<Command> {
        Ok(Command::new(program).with_args(args))
    }

    fn describe(&self) -> String {
        "plain".to_string()
    }
}

/// Builder that runs the delegate's command through an escalation program
///
/// The delegated program becomes the first argument of the escalation
/// program and the terminal preference is forced to
/// [`TtyMode::Recommended`], since escalation programs may prompt.
#[derive(Debug, Clone)]
pub struct EscalatingBuilder {
    delegate: Arc<dyn CommandBuilder>,
    program: String,
}

impl EscalatingBuilder {
    /// Escalate the delegate's commands with `sudo`
    pub fn new(delegate: Arc<dyn CommandBuilder>) -> Self {
        Self::with_program(delegate, DEFAULT_ESCALATION_PROGRAM)
    }

    /// Escalate the delegate's commands with a custom program
    pub fn with_program(delegate: Arc<dyn CommandBuilder>, program: impl Into<String>) -> Self {
        Self {
            delegate,
            program: program.into(),
        }
    }

    /// The escalation program
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl CommandBuilder for EscalatingBuilder {
    fn build(&self, program: &str, args: Vec<String>) -> Result<Command> {
        let delegated = self.delegate.build(program, args)?;

        let mut escalated_args = Vec::with_capacity(delegated.args().len() + 1);
        escalated_args.push(delegated.program().to_string());
        escalated_args.extend_from_slice(delegated.args());

        Ok(Command::new(self.program.as_str())
            .with_args(escalated_args)
            .with_tty(TtyMode::Recommended))
    }

    fn describe(&self) -> String {
        format!("{} via {}", self.delegate.describe(), self.program)
    }
}
