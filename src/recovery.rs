//! Panic recovery for command bodies and job actions.
//!
//! A panicking handler or job must not take down its driver task; the panic
//! is captured, logged and converted to an error value.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::types::{Error, Result};

/// Poll a future to completion, converting a panic into `Error::Internal`.
pub async fn with_recovery_async<Fut, T>(future: Fut, operation_name: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let panic_msg = extract_panic_message(payload.as_ref());
            tracing::error!(
                "panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );
            Err(Error::internal(format!(
                "panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Returns `Err(message)` if the future panicked, otherwise its output.
pub async fn catch_panic<Fut>(future: Fut) -> std::result::Result<Fut::Output, String>
where
    Fut: Future,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| extract_panic_message(payload.as_ref()))
}

/// Extract panic message from panic payload.
pub fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}
