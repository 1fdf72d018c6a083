//! Logging setup for the agent binary and tests.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log format (`json` or plain).
pub const LOG_FORMAT_ENV: &str = "EVA_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset: agent events at info, dependencies
/// (reqwest, hyper, rusqlite) only when they warn.
pub const DEFAULT_FILTER: &str = "warn,eva01=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Anything but `json` (any case) is compact.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Build the filter from a `RUST_LOG` value, falling back to
/// [`DEFAULT_FILTER`] when it is absent or does not parse.
pub fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log.filter(|v| !v.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|err| {
            eprintln!("invalid RUST_LOG '{directives}': {err}, using '{DEFAULT_FILTER}'");
            EnvFilter::new(DEFAULT_FILTER)
        }),
        None => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Initialize the tracing subscriber once for the process.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
        let env_filter = env_filter(rust_log.as_deref());

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Compact => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init(),
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
