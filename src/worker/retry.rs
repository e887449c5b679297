use std::future::Future;

use crate::config::RetryConfig;
use crate::error::Result;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out. Only `Infrastructure` errors are retried.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt - 1);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
