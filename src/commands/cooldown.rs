//! Per-(command, caller) cooldowns.
//!
//! Sliding window: a caller may use a command `uses` times within any window
//! of length `per`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::types::{CallerId, Error, Result};

/// Cooldown declared by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownSpec {
    pub uses: u32,
    pub per: Duration,
}

impl CooldownSpec {
    pub fn new(uses: u32, per: Duration) -> Self {
        Self { uses, per }
    }

    /// One use per `per`.
    pub fn once_per(per: Duration) -> Self {
        Self::new(1, per)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uses == 0 {
            return Err(Error::validation("cooldown must allow at least one use"));
        }
        if self.per.is_zero() {
            return Err(Error::validation("cooldown window must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Window {
    per: Duration,
    uses: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.uses.front() {
            if now.duration_since(oldest) >= self.per {
                self.uses.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Cooldown table keyed by (command, caller).
#[derive(Debug, Default)]
pub struct CooldownTracker {
    windows: Mutex<HashMap<(String, CallerId), Window>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use if allowed, otherwise return the remaining wait.
    pub async fn check_and_record(
        &self,
        command: &str,
        caller: &CallerId,
        spec: &CooldownSpec,
    ) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry((command.to_string(), caller.clone()))
            .or_insert_with(|| Window {
                per: spec.per,
                uses: VecDeque::new(),
            });
        window.per = spec.per;
        window.evict(now);

        if window.uses.len() >= spec.uses as usize {
            let oldest = window.uses.front().copied().unwrap_or(now);
            return Err((oldest + spec.per).saturating_duration_since(now));
        }

        window.uses.push_back(now);
        Ok(())
    }

    /// Remaining wait for a caller without recording a use.
    pub async fn remaining(&self, command: &str, caller: &CallerId, spec: &CooldownSpec) -> Duration {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        match windows.get(&(command.to_string(), caller.clone())) {
            Some(window) => {
                let live: Vec<Instant> = window
                    .uses
                    .iter()
                    .copied()
                    .filter(|used| now.duration_since(*used) < spec.per)
                    .collect();
                if live.len() >= spec.uses as usize {
                    live.first()
                        .map(|oldest| (*oldest + spec.per).saturating_duration_since(now))
                        .unwrap_or_default()
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Drop expired uses and empty windows. Returns the number of windows removed.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| {
            window.evict(now);
            !window.uses.is_empty()
        });
        before - windows.len()
    }

    /// Forget one caller's uses of a command.
    pub async fn reset(&self, command: &str, caller: &CallerId) {
        self.windows
            .lock()
            .await
            .remove(&(command.to_string(), caller.clone()));
    }

    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.windows.lock().await.is_empty()
    }
}
