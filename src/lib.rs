//! # eva01 - chat agent lifecycle and command core
//!
//! Provides:
//! - Ordered acquire/release of shared resources (cache, SQLite store, HTTP session)
//! - A job scheduler with cron, interval and run-once triggers (UTC)
//! - Command dispatch with parameter validation, cooldowns and panic capture
//! - A closed command-error taxonomy mapped to caller replies and escalation
//! - A lifecycle controller with hooks and ready/shutdown notifications
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────────────┐
//!                  │           LifecycleController            │
//!                  │  phases · hooks · notifications          │
//!                  │   ┌──────────────┐   ┌──────────────┐    │
//!                  │   │  Resource    │◄──│  Scheduler   │    │
//!                  │   │  Registry    │   │  (jobs)      │    │
//!                  │   └──────▲───────┘   └──────────────┘    │
//!                  └──────────┼───────────────────────────────┘
//!   invocations →   ┌─────────┴──────────┐    ┌──────────────────┐
//!                   │ CommandDispatcher  │──► │  classify()      │ → reply
//!                   └────────────────────┘    └────────┬─────────┘
//!                                                      └──► ExceptionSink
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod commands;
pub mod context;
pub mod lifecycle;
pub mod resources;
pub mod scheduler;
pub mod sinks;
pub mod types;

// Internal utilities
pub mod observability;
pub mod recovery;

pub use context::AgentContext;
pub use lifecycle::{LifecycleController, LifecycleHook, LifecyclePhase, ShutdownReport};
pub use types::{AgentConfig, Error, Result};
