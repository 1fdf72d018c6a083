//! Process lifecycle.
//!
//! ```text
//! Stopped ──start()──► Starting ──► Started ──stop()──► Stopping ──► Stopped
//!                          │                                          ▲
//!                          └──── required resource / hook failure ────┘
//! ```
//!
//! The controller owns phase state, the resource registry and the scheduler.
//! A controller runs once; `Stopped` is terminal after the first `start()`.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::commands::CommandDispatcher;
use crate::context::AgentContext;
use crate::recovery::with_recovery_async;
use crate::resources::{CacheHandle, HandleOutcome, ResourceHandle, SlotState, StoreHandle};
use crate::sinks::{ExceptionSink, NotificationSink};
use crate::types::{AgentConfig, Error, Result};

pub mod jobs;

pub const SHUTTING_DOWN_MESSAGE: &str = "Shutting down systems, closing IA neuronal interface...";

/// Text of the "ready" notification.
pub fn ready_message(bot_name: &str) -> String {
    format!("Systems loaded successfully! {} STARTED.", bot_name)
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Started => "started",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Named callbacks run at phase transitions, in registration order.
///
/// An `on_starting` failure aborts startup. Failures in the other two are
/// reported and logged. A panicking hook counts as a failed one.
#[async_trait]
pub trait LifecycleHook: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn on_starting(&self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn on_started(&self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn on_stopping(&self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
}

/// Result of a successful `start()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartReport {
    /// Handles acquired, in order.
    pub acquired: Vec<String>,
    /// Optional handles that failed and were skipped.
    pub skipped: Vec<String>,
}

/// Result of `stop()`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// False when `stop()` found nothing to do.
    pub performed: bool,
    /// Per-handle release outcomes, in release order.
    pub releases: Vec<HandleOutcome>,
}

impl ShutdownReport {
    pub fn released_names(&self) -> Vec<&str> {
        self.releases.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandleOutcome> {
        self.releases.iter().filter(|o| !o.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Orchestrates resource acquisition, the scheduler and notifications.
pub struct LifecycleController {
    context: AgentContext,
    dispatcher: Arc<CommandDispatcher>,
    notifier: Arc<dyn NotificationSink>,
    exceptions: Arc<dyn ExceptionSink>,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    phase: watch::Sender<LifecyclePhase>,
    /// Serializes transitions; true once `start()` has been called.
    ran: Mutex<bool>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("phase", &*self.phase.borrow())
            .field("notifier", &self.notifier)
            .field("exceptions", &self.exceptions)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    pub fn new(
        config: AgentConfig,
        notifier: Arc<dyn NotificationSink>,
        exceptions: Arc<dyn ExceptionSink>,
    ) -> Self {
        let context = AgentContext::new(config);
        let dispatcher = Arc::new(CommandDispatcher::new(context.clone(), exceptions.clone()));
        let (phase, _) = watch::channel(LifecyclePhase::Stopped);
        Self {
            context,
            dispatcher,
            notifier,
            exceptions,
            hooks: RwLock::new(Vec::new()),
            phase,
            ran: Mutex::new(false),
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Register a resource handle. Must happen before `start()`.
    pub async fn register_resource(
        &self,
        handle: Arc<dyn ResourceHandle>,
        required: bool,
    ) -> Result<()> {
        self.context.registry.register(handle, required).await
    }

    /// Append a hook. Must happen before `start()`.
    pub async fn add_hook(&self, hook: Arc<dyn LifecycleHook>) -> Result<()> {
        let ran = self.ran.lock().await;
        if *ran {
            return Err(Error::state_transition(format!(
                "cannot add hook '{}' after start",
                hook.name()
            )));
        }
        self.hooks.write().await.push(hook);
        Ok(())
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        let previous = self.phase.send_replace(phase);
        tracing::info!("lifecycle_phase: from={}, to={}", previous, phase);
    }

    async fn hooks(&self) -> Vec<Arc<dyn LifecycleHook>> {
        self.hooks.read().await.clone()
    }

    /// Acquire resources, start the scheduler and announce readiness.
    pub async fn start(&self) -> Result<StartReport> {
        let mut ran = self.ran.lock().await;
        if *ran {
            return Err(Error::state_transition(format!(
                "start() is allowed once; controller is {}",
                self.phase()
            )));
        }
        *ran = true;
        let started_at = Instant::now();
        self.set_phase(LifecyclePhase::Starting);

        for hook in self.hooks().await {
            let result = with_recovery_async(hook.on_starting(&self.context), hook.name()).await;
            if let Err(e) = result {
                tracing::error!("hook_failed: hook={}, phase=starting, error={}", hook.name(), e);
                return Err(self.abort_start(e).await);
            }
        }

        let mut report = StartReport::default();
        let mut fatal = None;
        for outcome in self.context.registry.acquire_all().await {
            match outcome.result {
                Ok(()) => report.acquired.push(outcome.name),
                Err(e) if outcome.required => {
                    fatal = Some(Error::acquire_failed(outcome.name, e));
                }
                Err(_) => report.skipped.push(outcome.name),
            }
        }
        if let Some(error) = fatal {
            return Err(self.abort_start(error).await);
        }

        if let Err(e) = self.install_jobs().await {
            return Err(self.abort_start(e).await);
        }
        if let Err(e) = self.context.scheduler.start().await {
            return Err(self.abort_start(e).await);
        }

        self.set_phase(LifecyclePhase::Started);

        for hook in self.hooks().await {
            let result = with_recovery_async(hook.on_started(&self.context), hook.name()).await;
            if let Err(e) = result {
                tracing::error!("hook_failed: hook={}, phase=started, error={}", hook.name(), e);
                self.exceptions
                    .report_lifecycle(LifecyclePhase::Started, &e)
                    .await;
            }
        }

        if let Err(e) = self
            .context
            .scheduler
            .add_job(jobs::heartbeat(started_at))
            .await
        {
            tracing::warn!("heartbeat_not_scheduled: error={}", e);
        }

        self.notify(&ready_message(&self.context.config.identity.bot_name))
            .await;
        tracing::info!(
            "agent_started: acquired={:?}, skipped={:?}",
            report.acquired,
            report.skipped
        );
        Ok(report)
    }

    /// Domain jobs for the resources that were actually acquired.
    async fn install_jobs(&self) -> Result<()> {
        let registry = &self.context.registry;
        let scheduler = &self.context.scheduler;
        let config = &self.context.config;

        if registry.state(StoreHandle::DEFAULT_NAME).await == Some(SlotState::Acquired) {
            scheduler
                .add_job(jobs::store_checkpoint(&config.store.checkpoint_cron)?)
                .await?;
        }
        if registry.state(CacheHandle::DEFAULT_NAME).await == Some(SlotState::Acquired) {
            scheduler
                .add_job(jobs::cache_sweep(config.scheduler.cache_sweep_interval))
                .await?;
        }
        scheduler
            .add_job(jobs::cooldown_prune(
                config.scheduler.cooldown_prune_interval,
                self.dispatcher.cooldowns(),
            ))
            .await?;
        Ok(())
    }

    /// Undo a partial start and end in Stopped.
    async fn abort_start(&self, error: Error) -> Error {
        for outcome in self.context.registry.release_all().await {
            if let Err(e) = &outcome.result {
                tracing::error!("abort_release_failed: name={}, error={}", outcome.name, e);
            }
        }
        self.exceptions
            .report_lifecycle(LifecyclePhase::Starting, &error)
            .await;
        self.set_phase(LifecyclePhase::Stopped);
        self.context.shutdown.cancel();
        tracing::error!("agent_start_failed: error={}", error);
        error
    }

    /// Stop the scheduler, release resources and announce shutdown.
    ///
    /// No-op unless the controller is Started.
    pub async fn stop(&self) -> ShutdownReport {
        let _ran = self.ran.lock().await;
        if self.phase() != LifecyclePhase::Started {
            tracing::debug!("stop_ignored: phase={}", self.phase());
            return ShutdownReport::default();
        }
        self.set_phase(LifecyclePhase::Stopping);

        for hook in self.hooks().await {
            let result = with_recovery_async(hook.on_stopping(&self.context), hook.name()).await;
            if let Err(e) = result {
                tracing::error!("hook_failed: hook={}, phase=stopping, error={}", hook.name(), e);
                self.exceptions
                    .report_lifecycle(LifecyclePhase::Stopping, &e)
                    .await;
            }
        }

        self.context.scheduler.stop().await;

        let releases = self.context.registry.release_all().await;
        for outcome in &releases {
            if let Err(e) = &outcome.result {
                self.exceptions
                    .report_lifecycle(LifecyclePhase::Stopping, e)
                    .await;
            }
        }

        self.notify(SHUTTING_DOWN_MESSAGE).await;
        self.set_phase(LifecyclePhase::Stopped);
        self.context.shutdown.cancel();

        let report = ShutdownReport {
            performed: true,
            releases,
        };
        tracing::info!(
            "agent_stopped: released={:?}, clean={}",
            report.released_names(),
            report.is_clean()
        );
        report
    }

    async fn notify(&self, message: &str) {
        let channel = self.context.config.identity.stdout_channel_id;
        if let Err(e) = self.notifier.deliver(channel, message).await {
            tracing::warn!("notification_failed: channel={}, error={}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{LogNotifier, TracingExceptionSink};
    use crate::types::{ChannelId, GuildId, IdentityConfig, Secret};

    #[derive(Debug)]
    struct FailingHook;

    #[async_trait]
    impl LifecycleHook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_starting(&self, _ctx: &AgentContext) -> Result<()> {
            Err(Error::internal("hook refused"))
        }
    }

    #[derive(Debug)]
    struct PanickingHook;

    #[async_trait]
    impl LifecycleHook for PanickingHook {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_started(&self, ctx: &AgentContext) -> Result<()> {
            if !ctx.shutdown.is_cancelled() {
                panic!("hook exploded");
            }
            Ok(())
        }
    }

    fn controller() -> LifecycleController {
        let config = AgentConfig::new(IdentityConfig {
            token: Secret::new("t"),
            default_guild_id: GuildId(1),
            stdout_channel_id: ChannelId(2),
            bot_name: "EVA-01".to_string(),
            prefix: "$".to_string(),
        });
        LifecycleController::new(config, Arc::new(LogNotifier), Arc::new(TracingExceptionSink))
    }

    #[test]
    fn test_messages() {
        assert_eq!(ready_message("EVA-01"), "Systems loaded successfully! EVA-01 STARTED.");
        assert_eq!(LifecyclePhase::Stopping.to_string(), "stopping");
    }

    #[tokio::test]
    async fn test_start_then_stop_without_resources() {
        let c = controller();
        assert_eq!(c.phase(), LifecyclePhase::Stopped);

        let report = c.start().await.unwrap();
        assert!(report.acquired.is_empty());
        assert_eq!(c.phase(), LifecyclePhase::Started);
        assert!(c.add_hook(Arc::new(FailingHook)).await.is_err());

        let shutdown = c.stop().await;
        assert!(shutdown.performed);
        assert!(shutdown.is_clean());
        assert_eq!(c.phase(), LifecyclePhase::Stopped);
        assert!(c.context().shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_start_is_allowed_once() {
        let c = controller();
        c.start().await.unwrap();
        c.stop().await;
        assert!(matches!(c.start().await, Err(Error::StateTransition(_))));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let c = controller();
        assert!(!c.stop().await.performed);
        assert_eq!(c.phase(), LifecyclePhase::Stopped);
        c.start().await.unwrap();
        c.stop().await;
    }

    #[tokio::test]
    async fn test_starting_hook_failure_aborts() {
        let c = controller();
        c.add_hook(Arc::new(FailingHook)).await.unwrap();
        let err = c.start().await.unwrap_err();
        assert!(err.to_string().contains("hook refused"));
        assert_eq!(c.phase(), LifecyclePhase::Stopped);
        assert!(!c.stop().await.performed);
    }

    #[tokio::test]
    async fn test_panicking_started_hook_is_not_fatal() {
        let c = controller();
        c.add_hook(Arc::new(PanickingHook)).await.unwrap();
        c.start().await.unwrap();
        assert_eq!(c.phase(), LifecyclePhase::Started);
        assert!(c.stop().await.performed);
    }

    #[tokio::test]
    async fn test_builtin_jobs_follow_acquired_resources() {
        let c = controller();
        c.register_resource(Arc::new(CacheHandle::new()), true)
            .await
            .unwrap();
        c.start().await.unwrap();

        let ids: Vec<String> = c
            .context()
            .scheduler
            .jobs()
            .await
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert!(ids.contains(&jobs::CACHE_SWEEP_JOB.to_string()));
        assert!(ids.contains(&jobs::COOLDOWN_PRUNE_JOB.to_string()));
        assert!(ids.contains(&jobs::HEARTBEAT_JOB.to_string()));
        assert!(!ids.contains(&jobs::STORE_CHECKPOINT_JOB.to_string()));
        c.stop().await;
    }
}
