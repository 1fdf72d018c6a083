//! In-process key/value cache with optional per-entry expiry.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Resource, ResourceHandle};
use crate::types::{Error, Result};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Concurrency-safe string cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value: value.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl).await;
        Ok(())
    }

    /// Returns true if the key existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Registry handle producing a [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct CacheHandle {
    name: String,
}

impl CacheHandle {
    pub const DEFAULT_NAME: &'static str = "cache";

    pub fn new() -> Self {
        Self::named(Self::DEFAULT_NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CacheHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceHandle for CacheHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Resource> {
        tracing::info!("cache_opened: name={}", self.name);
        Ok(Arc::new(MemoryCache::new()))
    }

    async fn release(&self, resource: Resource) -> Result<()> {
        let cache = resource
            .downcast::<MemoryCache>()
            .map_err(|_| Error::internal(format!("resource '{}' is not a cache", self.name)))?;
        let dropped = cache.len().await;
        cache.clear().await;
        tracing::info!("cache_closed: name={}, entries_dropped={}", self.name, dropped);
        Ok(())
    }
}
