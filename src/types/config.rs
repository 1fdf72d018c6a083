//! Configuration structures.
//!
//! Identity settings come from the environment (`TOKEN`, `DEFAULT_GUILD_ID`,
//! `STDOUT_CHANNEL_ID`, `BOT_NAME`); everything else has working defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{Error, Result};
use super::ids::{ChannelId, GuildId};

pub const ENV_TOKEN: &str = "TOKEN";
pub const ENV_DEFAULT_GUILD_ID: &str = "DEFAULT_GUILD_ID";
pub const ENV_STDOUT_CHANNEL_ID: &str = "STDOUT_CHANNEL_ID";
pub const ENV_BOT_NAME: &str = "BOT_NAME";

/// Credential that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Global agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Bot identity and notification target.
    pub identity: IdentityConfig,

    /// Relational store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbound HTTP session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Notification delivery configuration.
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Deploy command configuration.
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl AgentConfig {
    pub fn new(identity: IdentityConfig) -> Self {
        Self {
            identity,
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            notifier: NotifierConfig::default(),
            scheduler: SchedulerConfig::default(),
            deploy: DeployConfig::default(),
        }
    }

    /// Load identity settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load identity settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::config(format!("missing required variable {}", key)))
        };
        let snowflake = |key: &str| -> Result<u64> {
            let raw = required(key)?;
            raw.parse::<u64>()
                .map_err(|_| Error::config(format!("{} must be a numeric id, got '{}'", key, raw)))
        };

        let identity = IdentityConfig {
            token: Secret::new(required(ENV_TOKEN)?),
            default_guild_id: GuildId(snowflake(ENV_DEFAULT_GUILD_ID)?),
            stdout_channel_id: ChannelId(snowflake(ENV_STDOUT_CHANNEL_ID)?),
            bot_name: required(ENV_BOT_NAME)?,
            prefix: default_prefix(),
        };

        Ok(Self::new(identity))
    }
}

/// Bot identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Platform auth credential.
    pub token: Secret,

    /// Default scope for command registration.
    pub default_guild_id: GuildId,

    /// Channel receiving lifecycle notifications.
    pub stdout_channel_id: ChannelId,

    /// Display name used in notifications.
    pub bot_name: String,

    /// Prefix for text commands.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "$".to_string()
}

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,

    /// Schema script applied at open. The bundled script is used when absent.
    pub schema_path: PathBuf,

    /// Cron expression of the checkpoint (commit) job.
    pub checkpoint_cron: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/database.sqlite3"),
            schema_path: PathBuf::from("./data/build.sql"),
            checkpoint_cron: "0 * * * * *".to_string(),
        }
    }
}

/// Outbound HTTP session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub user_agent: String,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("eva01/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// REST API base of the chat platform.
    pub api_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long `stop()` waits for an in-flight job before warning that it is still running.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Period of the cache expiry sweep.
    #[serde(with = "humantime_serde")]
    pub cache_sweep_interval: Duration,

    /// Period of the cooldown table prune.
    #[serde(with = "humantime_serde")]
    pub cooldown_prune_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
            cache_sweep_interval: Duration::from_secs(60),
            cooldown_prune_interval: Duration::from_secs(300),
        }
    }
}

/// Deploy command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Executable run by the `deploy` command.
    pub script: PathBuf,

    /// Upper bound on one script run.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::from("./scripts/deploy.sh"),
            timeout: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_complete() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("TOKEN", "abc"),
            ("DEFAULT_GUILD_ID", "123"),
            ("STDOUT_CHANNEL_ID", "456"),
            ("BOT_NAME", "EVA-01"),
        ]))
        .unwrap();

        assert_eq!(config.identity.token.expose(), "abc");
        assert_eq!(config.identity.default_guild_id, GuildId(123));
        assert_eq!(config.identity.stdout_channel_id, ChannelId(456));
        assert_eq!(config.identity.bot_name, "EVA-01");
        assert_eq!(config.identity.prefix, "$");
        assert_eq!(config.store.checkpoint_cron, "0 * * * * *");
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let err = AgentConfig::from_lookup(lookup_from(&[
            ("DEFAULT_GUILD_ID", "123"),
            ("STDOUT_CHANNEL_ID", "456"),
            ("BOT_NAME", "EVA-01"),
        ]))
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("TOKEN"));
    }

    #[test]
    fn test_non_numeric_channel_rejected() {
        let err = AgentConfig::from_lookup(lookup_from(&[
            ("TOKEN", "abc"),
            ("DEFAULT_GUILD_ID", "123"),
            ("STDOUT_CHANNEL_ID", "general"),
            ("BOT_NAME", "EVA-01"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("STDOUT_CHANNEL_ID"));
    }

    #[test]
    fn test_token_redacted_in_debug() {
        let secret = Secret::new("super-secret");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
    }

    #[test]
    fn test_scheduler_config_humantime() {
        let json = serde_json::json!({
            "shutdown_grace": "5s",
            "cache_sweep_interval": "1m",
            "cooldown_prune_interval": "10m",
        });
        let config: SchedulerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
    }
}
