//! Outbound collaborators: lifecycle notifications and the process-level
//! exception sink.

use async_trait::async_trait;
use serde_json::json;
use std::fmt;

use crate::commands::CapturedError;
use crate::lifecycle::LifecyclePhase;
use crate::types::{ChannelId, Error, NotifierConfig, Result, Secret, SessionConfig};

// =============================================================================
// Notifications
// =============================================================================

/// Delivers plain-text lifecycle notifications to a chat channel.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn deliver(&self, channel: ChannelId, message: &str) -> Result<()>;
}

/// Posts messages through the chat platform's REST API.
#[derive(Debug)]
pub struct RestNotifier {
    client: reqwest::Client,
    api_base: String,
    token: Secret,
}

impl RestNotifier {
    pub fn new(notifier: &NotifierConfig, session: &SessionConfig, token: Secret) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(session.user_agent.clone())
            .timeout(session.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: notifier.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn messages_url(&self, channel: ChannelId) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel)
    }
}

#[async_trait]
impl NotificationSink for RestNotifier {
    async fn deliver(&self, channel: ChannelId, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.messages_url(channel))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bot {}", self.token.expose()),
            )
            .json(&json!({ "content": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::internal(format!(
                "notification to channel {} rejected: {} {}",
                channel, status, body
            )));
        }
        tracing::debug!("notification_delivered: channel={}", channel);
        Ok(())
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn deliver(&self, channel: ChannelId, message: &str) -> Result<()> {
        tracing::info!("notification: channel={}, message={}", channel, message);
        Ok(())
    }
}

// =============================================================================
// Exception sink
// =============================================================================

/// Process-level error reporting.
///
/// Receives each escalated command error exactly once, plus every lifecycle
/// phase-transition failure.
#[async_trait]
pub trait ExceptionSink: Send + Sync + fmt::Debug {
    async fn report_command(&self, captured: &CapturedError);

    async fn report_lifecycle(&self, phase: LifecyclePhase, error: &Error);
}

/// Logs reported errors at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExceptionSink;

#[async_trait]
impl ExceptionSink for TracingExceptionSink {
    async fn report_command(&self, captured: &CapturedError) {
        tracing::error!(
            invocation_id = %captured.origin.id,
            command = %captured.origin.name,
            caller = %captured.origin.caller.caller,
            kind = %captured.kind(),
            "command_escalated: {}",
            captured.cause
        );
    }

    async fn report_lifecycle(&self, phase: LifecyclePhase, error: &Error) {
        tracing::error!("lifecycle_failure: phase={}, error={}", phase, error);
    }
}
