//! Command registration and dispatch.
//!
//! Pipeline per invocation:
//! resolve → cooldown → bind arguments → run handler (panics captured).
//! Any failure becomes a single [`CapturedError`]; [`CommandDispatcher::handle`]
//! classifies it and produces the caller reply. Escalation is deferred to
//! [`Handled::finish`] so the gateway can send the reply first.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::classify::{classify, unknown_command_message, CapturedError, CommandFailure};
use super::cooldown::{CooldownSpec, CooldownTracker};
use super::invocation::CommandInvocation;
use super::params::{bind_arguments, ParamDef};
use crate::context::AgentContext;
use crate::recovery::catch_panic;
use crate::resources::{Store, StoreHandle};
use crate::sinks::ExceptionSink;
use crate::types::{Error, Result};

/// Successful command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub content: String,
}

impl Response {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Outcome of [`CommandDispatcher::handle`]: the reply to send, plus an
/// escalation that is still owed to the exception sink.
#[must_use = "send the reply, then call `finish()` to deliver any escalation"]
pub struct Handled {
    pub reply: String,
    escalation: Option<(Arc<dyn ExceptionSink>, CapturedError)>,
}

impl Handled {
    pub fn escalates(&self) -> bool {
        self.escalation.is_some()
    }

    /// Forward the escalated cause, if any. Call after the reply is sent.
    pub async fn finish(self) {
        if let Some((sink, captured)) = self.escalation {
            sink.report_command(&captured).await;
        }
    }
}

impl fmt::Debug for Handled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handled")
            .field("reply", &self.reply)
            .field("escalation", &self.escalation.as_ref().map(|(_, c)| c.to_string()))
            .finish()
    }
}

/// Everything a handler receives for one call.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub invocation: Arc<CommandInvocation>,
    /// Converted arguments, defaults filled in.
    pub args: Map<String, Value>,
    pub agent: AgentContext,
}

impl CommandContext {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(Value::as_i64)
    }

    pub fn arg_bool(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(Value::as_bool)
    }

    pub async fn resource<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.agent.resource::<T>(name).await
    }
}

/// Command body.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, ctx: CommandContext) -> Result<Response>;
}

/// Adapts an async closure into a [`CommandHandler`].
pub struct FnHandler<F>(F);

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn call(&self, ctx: CommandContext) -> Result<Response> {
        (self.0)(ctx).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registration record for one command.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDef>,
    pub cooldown: Option<CooldownSpec>,
    pub handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            cooldown: None,
            handler,
        }
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    pub fn cooldown(mut self, cooldown: CooldownSpec) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// One-line usage, e.g. `echo(text: string): Repeat text`.
    pub fn usage(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ParamDef::usage).collect();
        format!("{}({}): {}", self.name, params.join(", "), self.description)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(Error::validation(format!(
                "command name '{}' must be a single non-empty word",
                self.name
            )));
        }
        if let Some(cooldown) = &self.cooldown {
            cooldown.validate()?;
        }
        for (i, param) in self.params.iter().enumerate() {
            if self.params[..i]
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&param.name))
            {
                return Err(Error::validation(format!(
                    "command '{}' declares parameter '{}' twice",
                    self.name, param.name
                )));
            }
        }
        Ok(())
    }
}

/// Dispatch failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for command '{name}'")]
    HandlerNotFound { name: String },

    #[error("{0}")]
    Captured(CapturedError),
}

/// Resolves, validates and runs commands.
pub struct CommandDispatcher {
    context: AgentContext,
    commands: RwLock<HashMap<String, Arc<CommandSpec>>>,
    cooldowns: Arc<CooldownTracker>,
    exceptions: Arc<dyn ExceptionSink>,
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("exceptions", &self.exceptions)
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    pub fn new(context: AgentContext, exceptions: Arc<dyn ExceptionSink>) -> Self {
        Self {
            context,
            commands: RwLock::new(HashMap::new()),
            cooldowns: Arc::new(CooldownTracker::new()),
            exceptions,
        }
    }

    /// Register a command. Names are matched case-insensitively.
    pub async fn register(&self, spec: CommandSpec) -> Result<()> {
        spec.validate()?;
        let key = spec.name.to_lowercase();
        let mut commands = self.commands.write().await;
        if commands.contains_key(&key) {
            return Err(Error::validation(format!(
                "command '{}' already registered",
                spec.name
            )));
        }
        tracing::debug!("command_registered: name={}", key);
        commands.insert(key, Arc::new(spec));
        Ok(())
    }

    pub async fn command(&self, name: &str) -> Option<Arc<CommandSpec>> {
        self.commands.read().await.get(&name.to_lowercase()).cloned()
    }

    /// Registered command names, sorted.
    pub async fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cooldown table, shared with the prune job.
    pub fn cooldowns(&self) -> Arc<CooldownTracker> {
        self.cooldowns.clone()
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Run one invocation through the pipeline.
    pub async fn dispatch(
        &self,
        invocation: CommandInvocation,
    ) -> std::result::Result<Response, DispatchError> {
        let invocation = Arc::new(invocation);
        let Some(spec) = self.command(&invocation.name).await else {
            tracing::debug!("command_not_found: name={}", invocation.name);
            return Err(DispatchError::HandlerNotFound {
                name: invocation.name.clone(),
            });
        };

        let captured = |cause| DispatchError::Captured(CapturedError::new(invocation.clone(), cause));

        if let Some(cooldown) = &spec.cooldown {
            let key = spec.name.to_lowercase();
            if let Err(retry_after) = self
                .cooldowns
                .check_and_record(&key, &invocation.caller.caller, cooldown)
                .await
            {
                return Err(captured(CommandFailure::Cooldown { retry_after }));
            }
        }

        let args = bind_arguments(&spec.params, &invocation.arguments, &invocation.positional)
            .map_err(captured)?;

        let ctx = CommandContext {
            invocation: invocation.clone(),
            args,
            agent: self.context.clone(),
        };

        tracing::debug!(
            "command_invoked: name={}, caller={}, id={}",
            spec.name,
            invocation.caller.caller,
            invocation.id
        );
        match catch_panic(spec.handler.call(ctx)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(captured(CommandFailure::Invocation(e))),
            Err(panic_msg) => Err(captured(CommandFailure::Invocation(Error::internal(
                format!("handler '{}' panicked: {}", spec.name, panic_msg),
            )))),
        }
    }

    /// Dispatch, classify and record the outcome. The returned [`Handled`]
    /// holds the reply; its escalation is delivered by [`Handled::finish`].
    pub async fn handle(&self, invocation: CommandInvocation) -> Handled {
        let command = invocation.name.clone();
        let caller = invocation.caller.caller.to_string();

        let (reply, outcome, escalated) = match self.dispatch(invocation).await {
            Ok(response) => (response.content, "ok".to_string(), None),
            Err(DispatchError::HandlerNotFound { name }) => {
                (unknown_command_message(&name), "not_found".to_string(), None)
            }
            Err(DispatchError::Captured(captured)) => {
                let classification = classify(&captured);
                tracing::info!(
                    "command_failed: name={}, caller={}, kind={}, escalate={}",
                    command,
                    caller,
                    classification.kind,
                    classification.escalate
                );
                let escalated = classification.escalate.then_some(captured);
                (
                    classification.caller_message,
                    classification.kind.to_string(),
                    escalated,
                )
            }
        };

        self.record(&command, &caller, &outcome).await;
        Handled {
            reply,
            escalation: escalated.map(|captured| (self.exceptions.clone(), captured)),
        }
    }

    async fn record(&self, command: &str, caller: &str, outcome: &str) {
        let Ok(store) = self
            .context
            .registry
            .get::<Store>(StoreHandle::DEFAULT_NAME)
            .await
        else {
            return;
        };
        if let Err(e) = store.record_command(command, caller, outcome).await {
            tracing::warn!("command_log_failed: name={}, error={}", command, e);
        }
    }
}
