//! Metron Storage Timeouts
//!
//! Every call into the value store runs under the configured operation
//! timeout. Expiry surfaces as a retryable storage error.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use metron_common::{MetronError, Result};
use std::future::Future;
use std::time::Duration;

/// Run a store operation, failing with [`MetronError::Timeout`] on expiry.
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Storage operation {} timed out after {:?}", operation, timeout);
            Err(MetronError::Timeout {
                operation: operation.to_string(),
                timeout,
            })
        }
    }
}
