use crate::config::RetryPolicy;
use std::future::Future;
use tokio::time::sleep;
use wfcore::PersistenceError;

/// Run a repository call, retrying backend failures with backoff.
/// `NotFound` is returned immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e @ PersistenceError::NotFound { .. }) => return Err(e),
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "repository call failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation, attempts = attempt, error = %e, "repository call failed");
                return Err(e);
            }
        }
    }
}
