//! Explicit context shared by commands, hooks and jobs.

use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::resources::ResourceRegistry;
use crate::scheduler::Scheduler;
use crate::types::{AgentConfig, Result};

/// Everything a command, hook or job may reach. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub registry: Arc<ResourceRegistry>,
    pub scheduler: Scheduler,
    /// Cancelled when the process should shut down.
    pub shutdown: CancellationToken,
}

impl AgentContext {
    pub fn new(config: AgentConfig) -> Self {
        let registry = Arc::new(ResourceRegistry::new());
        let scheduler = Scheduler::new(registry.clone(), &config.scheduler);
        Self {
            config: Arc::new(config),
            registry,
            scheduler,
            shutdown: CancellationToken::new(),
        }
    }

    /// Typed access to an acquired resource.
    pub async fn resource<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.registry.get::<T>(name).await
    }

    /// Ask the process to shut down.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("shutdown_requested");
        }
        self.shutdown.cancel();
    }
}
