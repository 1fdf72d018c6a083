//! Outbound HTTP session.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Resource, ResourceHandle};
use crate::types::{Error, Result, SessionConfig};

/// Shared HTTP client. Proxy settings are taken from the environment.
#[derive(Debug)]
pub struct HttpSession {
    client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpSession {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    /// Underlying client, unless the session has been closed.
    pub fn client(&self) -> Result<&reqwest::Client> {
        if self.is_closed() {
            return Err(Error::not_acquired("session"));
        }
        Ok(&self.client)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client()?.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client()?.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Registry handle producing an [`HttpSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    name: String,
    config: SessionConfig,
}

impl SessionHandle {
    pub const DEFAULT_NAME: &'static str = "session";

    pub fn new(config: SessionConfig) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            config,
        }
    }
}

#[async_trait]
impl ResourceHandle for SessionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Resource> {
        let session = HttpSession::new(&self.config)?;
        tracing::info!("http_session_started: user_agent={}", self.config.user_agent);
        Ok(Arc::new(session))
    }

    async fn release(&self, resource: Resource) -> Result<()> {
        let session = resource
            .downcast::<HttpSession>()
            .map_err(|_| Error::internal(format!("resource '{}' is not a session", self.name)))?;
        session.close();
        tracing::info!("http_session_closed");
        Ok(())
    }
}
