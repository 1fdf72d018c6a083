//! Commands every agent ships with.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::cooldown::CooldownSpec;
use super::dispatcher::{CommandContext, CommandDispatcher, CommandHandler, CommandSpec, Response};
use super::params::{ParamDef, ParamType};
use crate::types::{DeployConfig, Error, Result};

pub const PONG: &str = "Pong.";
pub const SHUTDOWN_REPLY: &str = "Shutting down systems, closing IA neuronal interface...";
pub const DEPLOY_REPLY: &str = "Test deploy - core.";
pub const DEPLOY_COOLDOWN: Duration = Duration::from_secs(30);

/// Register `ping`, `echo`, `deploy` and `shutdown`.
pub async fn register_builtins(dispatcher: &CommandDispatcher) -> Result<()> {
    let deploy = dispatcher.context().config.deploy.clone();
    dispatcher.register(ping()).await?;
    dispatcher.register(echo()).await?;
    dispatcher.register(deploy_command(deploy)).await?;
    dispatcher.register(shutdown()).await?;
    Ok(())
}

#[derive(Debug)]
struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn call(&self, _ctx: CommandContext) -> Result<Response> {
        Ok(Response::text(PONG))
    }
}

pub fn ping() -> CommandSpec {
    CommandSpec::new("ping", "Says pong.", Arc::new(Ping))
}

#[derive(Debug)]
struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    async fn call(&self, ctx: CommandContext) -> Result<Response> {
        let text = ctx
            .arg_str("text")
            .ok_or_else(|| Error::internal("echo called without bound text"))?;
        Ok(Response::text(text))
    }
}

pub fn echo() -> CommandSpec {
    CommandSpec::new("echo", "Repeats the given text.", Arc::new(Echo))
        .param(ParamDef::new("text", ParamType::String, "Text to repeat"))
}

#[derive(Debug)]
struct Shutdown;

#[async_trait]
impl CommandHandler for Shutdown {
    async fn call(&self, ctx: CommandContext) -> Result<Response> {
        tracing::info!("shutdown_command: caller={}", ctx.invocation.caller.caller);
        ctx.agent.request_shutdown();
        Ok(Response::text(SHUTDOWN_REPLY))
    }
}

pub fn shutdown() -> CommandSpec {
    CommandSpec::new("shutdown", "Close the connections of the bot.", Arc::new(Shutdown))
}

/// Runs the configured deploy script.
#[derive(Debug)]
struct Deploy {
    config: DeployConfig,
}

#[async_trait]
impl CommandHandler for Deploy {
    async fn call(&self, ctx: CommandContext) -> Result<Response> {
        let script = &self.config.script;
        tracing::info!(
            "deploy_started: script={}, caller={}",
            script.display(),
            ctx.invocation.caller.caller
        );

        let mut child = tokio::process::Command::new(script)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::command(format!("cannot run {}: {}", script.display(), e)))?;

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(Error::timeout(format!(
                    "deploy script exceeded {}s",
                    self.config.timeout.as_secs()
                )))
            }
        };

        if !status.success() {
            return Err(Error::command(format!(
                "deploy script {} exited with {}",
                script.display(),
                status
            )));
        }

        tracing::info!("deploy_finished: script={}", script.display());
        Ok(Response::text(DEPLOY_REPLY))
    }
}

pub fn deploy_command(config: DeployConfig) -> CommandSpec {
    CommandSpec::new("deploy", "Use to deploy a serverless stack.", Arc::new(Deploy { config }))
        .cooldown(CooldownSpec::once_per(DEPLOY_COOLDOWN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::classify::ErrorKind;
    use crate::commands::dispatcher::DispatchError;
    use crate::commands::invocation::{CallerContext, CommandInvocation};
    use crate::context::AgentContext;
    use crate::sinks::TracingExceptionSink;
    use crate::types::{AgentConfig, ChannelId, GuildId, IdentityConfig, Secret};
    use std::path::PathBuf;

    fn agent(deploy: DeployConfig) -> AgentContext {
        let mut config = AgentConfig::new(IdentityConfig {
            token: Secret::new("t"),
            default_guild_id: GuildId(1),
            stdout_channel_id: ChannelId(2),
            bot_name: "EVA-01".to_string(),
            prefix: "$".to_string(),
        });
        config.deploy = deploy;
        AgentContext::new(config)
    }

    async fn dispatcher(deploy: DeployConfig) -> CommandDispatcher {
        let d = CommandDispatcher::new(agent(deploy), Arc::new(TracingExceptionSink));
        register_builtins(&d).await.unwrap();
        d
    }

    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("deploy.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_ping_and_echo() {
        let d = dispatcher(DeployConfig::default()).await;
        assert_eq!(
            d.handle(CommandInvocation::new("ping", CallerContext::user(1))).await.reply,
            PONG
        );
        assert_eq!(
            d.handle(CommandInvocation::new("echo", CallerContext::user(1)).arg("text", "hello"))
                .await
                .reply,
            "hello"
        );
        assert_eq!(
            d.handle(CommandInvocation::new("echo", CallerContext::user(1))).await.reply,
            "There are some missing arguments: text"
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let d = dispatcher(DeployConfig::default()).await;
        let token = d.context().shutdown.clone();
        assert!(!token.is_cancelled());

        let reply = d
            .handle(CommandInvocation::new("shutdown", CallerContext::console()))
            .await
            .reply;
        assert_eq!(reply, SHUTDOWN_REPLY);
        assert!(token.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deploy_runs_script_then_cools_down() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let deploy = DeployConfig {
            script: script(&dir, &format!("echo x >> {}", marker.display())),
            timeout: Duration::from_secs(10),
        };
        let d = dispatcher(deploy).await;

        let first = d
            .dispatch(CommandInvocation::new("deploy", CallerContext::user(8)))
            .await
            .unwrap();
        assert_eq!(first.content, DEPLOY_REPLY);

        match d
            .dispatch(CommandInvocation::new("deploy", CallerContext::user(8)))
            .await
        {
            Err(DispatchError::Captured(captured)) => {
                assert_eq!(captured.kind(), ErrorKind::Cooldown)
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deploy_failure_is_invocation_error() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = DeployConfig {
            script: script(&dir, "exit 3"),
            timeout: Duration::from_secs(10),
        };
        let d = dispatcher(deploy).await;

        match d
            .dispatch(CommandInvocation::new("deploy", CallerContext::user(8)))
            .await
        {
            Err(DispatchError::Captured(captured)) => {
                assert_eq!(captured.kind(), ErrorKind::InvocationError);
                assert!(captured.to_string().contains("exited with"));
            }
            other => panic!("expected invocation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deploy_missing_script() {
        let d = dispatcher(DeployConfig {
            script: PathBuf::from("/nonexistent/deploy.sh"),
            timeout: Duration::from_secs(1),
        })
        .await;
        let reply = d
            .handle(CommandInvocation::new("deploy", CallerContext::user(2)))
            .await;
        assert_eq!(reply.reply, crate::commands::GENERIC_FAILURE_MESSAGE);
        assert!(reply.escalates());
        reply.finish().await;
    }
}
