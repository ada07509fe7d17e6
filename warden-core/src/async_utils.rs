//! Async utilities
//!
//! Timeout guard used for one-time startup readiness gating

use crate::error::{ErrorContext, WardenError, WardenResult};
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Run a future, failing with `WardenError::Timeout` once `timeout_ms` elapses.
///
/// The future is dropped on timeout; this is a startup guard, not a
/// cancellation mechanism for individual operations.
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> WardenResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout_ms,
                "Operation timed out"
            );
            Err(WardenError::Timeout {
                operation: operation_name.to_string(),
                duration_ms: timeout_ms,
                context: ErrorContext::new("async_utils")
                    .with_operation("timeout")
                    .with_metadata("timeout_ms", &timeout_ms.to_string())
                    .with_suggestion("Increase startup.readiness_timeout_seconds")
                    .with_suggestion("Check connectivity to the remote identity service"),
            })
        }
    }
}
