//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the agent.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration (fatal before startup).
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation errors.
    #[error("validation error: {0}")]
    Validation(String),

    /// Named entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource accessed before acquisition or after release.
    #[error("resource '{0}' is not acquired")]
    NotAcquired(String),

    /// Resource stored under a name has a different type than requested.
    #[error("resource '{name}' is not a {expected}")]
    ResourceTypeMismatch {
        name: String,
        expected: &'static str,
    },

    /// A required resource could not be acquired during startup.
    #[error("failed to acquire resource '{name}': {source}")]
    ResourceAcquireFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// A resource failed to release during shutdown.
    #[error("failed to release resource '{name}': {source}")]
    ResourceReleaseFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Invalid lifecycle or scheduler state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Command body failure raised by a handler.
    #[error("command failed: {0}")]
    Command(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Cancellation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Relational store errors.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Outbound HTTP errors.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_acquired(name: impl Into<String>) -> Self {
        Self::NotAcquired(name.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn acquire_failed(name: impl Into<String>, source: Error) -> Self {
        Self::ResourceAcquireFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn release_failed(name: impl Into<String>, source: Error) -> Self {
        Self::ResourceReleaseFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// True for errors that must abort process bring-up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ResourceAcquireFailed { .. })
    }
}
