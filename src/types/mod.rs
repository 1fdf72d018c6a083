//! Core types for the agent.
//!
//! - **IDs**: Strongly-typed identifiers (JobId, CallerId, ChannelId, ...)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures loaded from the environment

mod config;
mod errors;
mod ids;

pub use config::{
    AgentConfig, DeployConfig, IdentityConfig, NotifierConfig, SchedulerConfig, Secret, SessionConfig,
    StoreConfig, ENV_BOT_NAME, ENV_DEFAULT_GUILD_ID, ENV_STDOUT_CHANNEL_ID, ENV_TOKEN,
};
pub use errors::{Error, Result};
pub use ids::{CallerId, ChannelId, GuildId, InvocationId, JobId};
