//! Command failure taxonomy and classification.
//!
//! Every failed invocation produces exactly one [`CapturedError`]. Its
//! [`ErrorKind`] is derived from the cause variant, and [`classify`] maps it
//! to the caller-facing message plus an escalation decision in one `match`.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::invocation::CommandInvocation;
use crate::types::Error;

/// Caller-facing notice for failures that are escalated.
pub const GENERIC_FAILURE_MESSAGE: &str = "Critic levels of power... ||MASSIVE ERROR|| ! ! !";

/// Closed set of command failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingArguments,
    InvalidArgument,
    Cooldown,
    InvocationError,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingArguments => "missing_arguments",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Cooldown => "cooldown",
            ErrorKind::InvocationError => "invocation_error",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw cause of a failed invocation.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("missing arguments: {}", .0.join(", "))]
    MissingArguments(Vec<String>),

    #[error("invalid argument '{option}': {reason}")]
    InvalidArgument { option: String, reason: String },

    #[error("command on cooldown, retry after {:.1}s", .retry_after.as_secs_f64())]
    Cooldown { retry_after: Duration },

    /// The handler body returned an error or panicked.
    #[error("command body failed: {0}")]
    Invocation(#[source] Error),

    /// A failure outside the handler body that fits no other kind.
    #[error("unclassified command failure: {0}")]
    Unclassified(#[source] Error),
}

impl CommandFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandFailure::MissingArguments(_) => ErrorKind::MissingArguments,
            CommandFailure::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            CommandFailure::Cooldown { .. } => ErrorKind::Cooldown,
            CommandFailure::Invocation(_) => ErrorKind::InvocationError,
            CommandFailure::Unclassified(_) => ErrorKind::Unclassified,
        }
    }
}

/// A failed invocation together with its cause.
#[derive(Debug)]
pub struct CapturedError {
    pub origin: Arc<CommandInvocation>,
    pub cause: CommandFailure,
}

impl CapturedError {
    pub fn new(origin: Arc<CommandInvocation>, cause: CommandFailure) -> Self {
        Self { origin, cause }
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    /// Underlying crate error for escalated kinds.
    pub fn source_error(&self) -> Option<&Error> {
        match &self.cause {
            CommandFailure::Invocation(e) | CommandFailure::Unclassified(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command '{}' from {} failed ({}): {}",
            self.origin.name,
            self.origin.caller.caller,
            self.kind(),
            self.cause
        )
    }
}

/// Caller response and escalation decision for one captured error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub caller_message: String,
    pub escalate: bool,
}

/// Map a captured error to its caller message and escalation decision.
pub fn classify(captured: &CapturedError) -> Classification {
    let (caller_message, escalate) = match &captured.cause {
        CommandFailure::MissingArguments(names) => (
            format!("There are some missing arguments: {}", names.join(", ")),
            false,
        ),
        CommandFailure::InvalidArgument { option, .. } => {
            (format!("The '{}' option is invalid.", option), false)
        }
        CommandFailure::Cooldown { retry_after } => (
            format!(
                "Command is in cooldown. Try again in {:.0} seconds",
                retry_after.as_secs_f64()
            ),
            false,
        ),
        CommandFailure::Invocation(_) | CommandFailure::Unclassified(_) => {
            (GENERIC_FAILURE_MESSAGE.to_string(), true)
        }
    };

    Classification {
        kind: captured.kind(),
        caller_message,
        escalate,
    }
}

/// Caller message for a command name with no registered handler.
pub fn unknown_command_message(name: &str) -> String {
    format!("Unknown command `{}`.", name)
}
