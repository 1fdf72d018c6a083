//! Shared backend resources and their ordered acquire/release.
//!
//! The registry holds an ordered list of [`ResourceHandle`]s. Registration
//! order is acquisition order; release walks the list backwards so that a
//! handle is always released before the handles it depends on.
//!
//! ```text
//! acquire:  cache → store → session
//! release:  session → store → cache
//! ```

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Error, Result};

pub mod cache;
pub mod session;
pub mod store;

pub use cache::{CacheHandle, MemoryCache};
pub use session::{HttpSession, SessionHandle};
pub use store::{SqlValue, Store, StoreHandle};

/// Type-erased resource produced by a handle.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// A named, acquire/release-scoped wrapper around one shared resource.
#[async_trait]
pub trait ResourceHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn acquire(&self) -> Result<Resource>;

    async fn release(&self, resource: Resource) -> Result<()>;
}

/// Slot state for one registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Registered,
    Acquired,
    Failed,
    Released,
}

struct Slot {
    handle: Arc<dyn ResourceHandle>,
    required: bool,
    state: SlotState,
    resource: Option<Resource>,
}

/// Result of acquiring or releasing one handle.
#[derive(Debug)]
pub struct HandleOutcome {
    pub name: String,
    pub required: bool,
    pub result: Result<()>,
}

impl HandleOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// A required handle that failed.
    pub fn is_fatal(&self) -> bool {
        self.required && self.result.is_err()
    }
}

/// Ordered registry of shared resources.
pub struct ResourceRegistry {
    slots: RwLock<Vec<Slot>>,
    sealed: AtomicBool,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("sealed", &self.sealed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Append a handle. Rejected once acquisition has begun.
    pub async fn register(&self, handle: Arc<dyn ResourceHandle>, required: bool) -> Result<()> {
        // `sealed` only changes under the slots write lock.
        let mut slots = self.slots.write().await;
        if self.sealed.load(Ordering::SeqCst) {
            return Err(Error::state_transition(format!(
                "cannot register resource '{}' after acquisition started",
                handle.name()
            )));
        }
        if slots.iter().any(|s| s.handle.name() == handle.name()) {
            return Err(Error::validation(format!(
                "resource '{}' already registered",
                handle.name()
            )));
        }
        slots.push(Slot {
            handle,
            required,
            state: SlotState::Registered,
            resource: None,
        });
        Ok(())
    }

    /// Acquire every handle in registration order.
    ///
    /// Stops at the first failing required handle; optional failures are
    /// logged and skipped. Already-acquired handles are left for
    /// [`release_all`](Self::release_all).
    pub async fn acquire_all(&self) -> Vec<HandleOutcome> {
        let count = {
            let slots = self.slots.write().await;
            self.sealed.store(true, Ordering::SeqCst);
            slots.len()
        };
        let mut outcomes = Vec::with_capacity(count);

        for index in 0..count {
            let (handle, required) = {
                let slots = self.slots.read().await;
                match slots.get(index) {
                    Some(slot) if slot.state == SlotState::Registered => {
                        (slot.handle.clone(), slot.required)
                    }
                    _ => continue,
                }
            };
            let name = handle.name().to_string();
            let acquired = handle.acquire().await;

            let mut slots = self.slots.write().await;
            let Some(slot) = slots.get_mut(index) else {
                continue;
            };
            match acquired {
                Ok(resource) => {
                    slot.state = SlotState::Acquired;
                    slot.resource = Some(resource);
                    tracing::info!("resource_acquired: name={}", name);
                    outcomes.push(HandleOutcome {
                        name,
                        required,
                        result: Ok(()),
                    });
                }
                Err(e) => {
                    slot.state = SlotState::Failed;
                    if required {
                        tracing::error!("resource_acquire_failed: name={}, error={}", name, e);
                    } else {
                        tracing::warn!("optional_resource_unavailable: name={}, error={}", name, e);
                    }
                    outcomes.push(HandleOutcome {
                        name,
                        required,
                        result: Err(e),
                    });
                    if required {
                        break;
                    }
                }
            }
        }

        outcomes
    }

    /// Release every acquired handle in reverse registration order.
    ///
    /// Each handle is released at most once; failures are logged and
    /// collected without stopping the remaining releases.
    pub async fn release_all(&self) -> Vec<HandleOutcome> {
        let count = self.slots.read().await.len();
        let mut outcomes = Vec::new();

        for index in (0..count).rev() {
            let taken = {
                let mut slots = self.slots.write().await;
                match slots.get_mut(index) {
                    Some(slot) if slot.state == SlotState::Acquired => {
                        slot.state = SlotState::Released;
                        slot.resource
                            .take()
                            .map(|resource| (slot.handle.clone(), slot.required, resource))
                    }
                    _ => None,
                }
            };
            let Some((handle, required, resource)) = taken else {
                continue;
            };

            let name = handle.name().to_string();
            let result = match handle.release(resource).await {
                Ok(()) => {
                    tracing::info!("resource_released: name={}", name);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("resource_release_failed: name={}, error={}", name, e);
                    Err(Error::release_failed(name.clone(), e))
                }
            };
            outcomes.push(HandleOutcome {
                name,
                required,
                result,
            });
        }

        outcomes
    }

    /// Typed access to an acquired resource.
    pub async fn get<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slots = self.slots.read().await;
        let slot = slots
            .iter()
            .find(|s| s.handle.name() == name)
            .ok_or_else(|| Error::not_found(format!("unknown resource: {}", name)))?;

        let resource = match (slot.state, &slot.resource) {
            (SlotState::Acquired, Some(resource)) => resource.clone(),
            _ => return Err(Error::not_acquired(name)),
        };

        resource
            .downcast::<T>()
            .map_err(|_| Error::ResourceTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// State of a registered handle.
    pub async fn state(&self, name: &str) -> Option<SlotState> {
        self.slots
            .read()
            .await
            .iter()
            .find(|s| s.handle.name() == name)
            .map(|s| s.state)
    }

    /// Names of handles currently held, in acquisition order.
    pub async fn acquired_names(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|s| s.state == SlotState::Acquired)
            .map(|s| s.handle.name().to_string())
            .collect()
    }

    /// Registered handle names, in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .iter()
            .map(|s| s.handle.name().to_string())
            .collect()
    }
}
