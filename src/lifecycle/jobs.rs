//! Background jobs installed by the controller.
//!
//! - `store-checkpoint`: commits pending store writes on a cron schedule
//! - `cache-sweep`: drops expired cache entries
//! - `cooldown-prune`: forgets expired cooldown windows
//! - `heartbeat`: one diagnostic line after startup

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::commands::CooldownTracker;
use crate::resources::{CacheHandle, MemoryCache, Store, StoreHandle};
use crate::scheduler::{Job, Trigger};
use crate::types::{JobId, Result};

pub const STORE_CHECKPOINT_JOB: &str = "store-checkpoint";
pub const CACHE_SWEEP_JOB: &str = "cache-sweep";
pub const COOLDOWN_PRUNE_JOB: &str = "cooldown-prune";
pub const HEARTBEAT_JOB: &str = "heartbeat";

pub fn store_checkpoint(cron: &str) -> Result<Job> {
    Ok(Job::new(
        JobId::named(STORE_CHECKPOINT_JOB),
        Trigger::cron(cron)?,
        |registry| async move {
            let store = registry.get::<Store>(StoreHandle::DEFAULT_NAME).await?;
            if store.commit().await? {
                tracing::debug!("store_checkpoint: committed");
            }
            Ok(())
        },
    ))
}

pub fn cache_sweep(every: Duration) -> Job {
    Job::new(
        JobId::named(CACHE_SWEEP_JOB),
        Trigger::every(every),
        |registry| async move {
            let cache = registry.get::<MemoryCache>(CacheHandle::DEFAULT_NAME).await?;
            let removed = cache.sweep_expired().await;
            if removed > 0 {
                tracing::debug!("cache_sweep: removed={}", removed);
            }
            Ok(())
        },
    )
}

pub fn cooldown_prune(every: Duration, cooldowns: Arc<CooldownTracker>) -> Job {
    Job::new(
        JobId::named(COOLDOWN_PRUNE_JOB),
        Trigger::every(every),
        move |_| {
            let cooldowns = cooldowns.clone();
            async move {
                let removed = cooldowns.prune().await;
                if removed > 0 {
                    tracing::debug!("cooldown_prune: removed={}", removed);
                }
                Ok(())
            }
        },
    )
}

pub fn heartbeat(started_at: Instant) -> Job {
    Job::new(JobId::named(HEARTBEAT_JOB), Trigger::once(), move |registry| async move {
        let held = registry.acquired_names().await;
        tracing::info!(
            "heartbeat: uptime_ms={}, resources=[{}]",
            started_at.elapsed().as_millis(),
            held.join(", ")
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceRegistry;
    use crate::commands::CooldownSpec;
    use crate::types::{CallerId, Error, StoreConfig};

    #[test]
    fn test_checkpoint_rejects_bad_cron() {
        assert!(store_checkpoint("every minute").is_err());
        assert!(store_checkpoint("0 * * * * *").is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_commits_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ResourceRegistry::new());
        registry
            .register(
                Arc::new(StoreHandle::new(StoreConfig {
                    path: dir.path().join("db.sqlite3"),
                    schema_path: dir.path().join("none.sql"),
                    ..StoreConfig::default()
                })),
                true,
            )
            .await
            .unwrap();
        registry.acquire_all().await;

        let store = registry.get::<Store>(StoreHandle::DEFAULT_NAME).await.unwrap();
        store.record_command("ping", "1", "ok").await.unwrap();
        assert!(store.has_pending().await.unwrap());

        let job = store_checkpoint("0 * * * * *").unwrap();
        (job.action)(registry.clone()).await.unwrap();
        assert!(!store.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_fails_without_store() {
        let registry = Arc::new(ResourceRegistry::new());
        let job = store_checkpoint("0 * * * * *").unwrap();
        let err = (job.action)(registry).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sweep_and_cooldown_prune() {
        let registry = Arc::new(ResourceRegistry::new());
        registry
            .register(Arc::new(CacheHandle::new()), true)
            .await
            .unwrap();
        registry.acquire_all().await;
        let cache = registry
            .get::<MemoryCache>(CacheHandle::DEFAULT_NAME)
            .await
            .unwrap();
        cache.set("k", "v", Some(Duration::from_secs(1))).await;

        let tracker = Arc::new(CooldownTracker::new());
        tracker
            .check_and_record(
                "deploy",
                &CallerId::user(1),
                &CooldownSpec::once_per(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        (cache_sweep(Duration::from_secs(60)).action)(registry.clone())
            .await
            .unwrap();
        (cooldown_prune(Duration::from_secs(60), tracker.clone()).action)(registry)
            .await
            .unwrap();

        assert!(cache.is_empty().await);
        assert!(tracker.is_empty().await);
    }
}
