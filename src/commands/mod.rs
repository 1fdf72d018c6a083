//! Command dispatch and error classification.
//!
//! - **invocation**: parsed calls and prefix parsing
//! - **params**: declared parameter schema and raw-argument conversion
//! - **cooldown**: per-(command, caller) sliding windows
//! - **classify**: failure taxonomy and caller messages
//! - **dispatcher**: registration and the dispatch pipeline
//! - **builtin**: `ping`, `echo`, `deploy`, `shutdown`

pub mod builtin;
mod classify;
mod cooldown;
mod dispatcher;
mod invocation;
mod params;

pub use builtin::register_builtins;
pub use classify::{
    classify, unknown_command_message, CapturedError, Classification, CommandFailure, ErrorKind,
    GENERIC_FAILURE_MESSAGE,
};
pub use cooldown::{CooldownSpec, CooldownTracker};
pub use dispatcher::{
    handler_fn, CommandContext, CommandDispatcher, CommandHandler, CommandSpec, DispatchError,
    FnHandler, Handled, Response,
};
pub use invocation::{CallerContext, CommandInvocation};
pub use params::{ParamDef, ParamType};
