//! Retry executor (C4).
//!
//! Wraps a fallible async operation with a fixed-attempt / fixed-delay policy. The
//! classifier lives on [`CoreError`] itself (`is_retryable`); this module only owns the
//! attempt/delay loop and the logging around it.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::CoreError;

/// Runs `op` under `config`'s attempt/delay policy, retrying only while `should_retry`
/// returns true for the most recent error. On exhaustion the last error is returned
/// unchanged so its source chain is preserved.
pub async fn execute<T, F, Fut>(
    config: &RetryConfig,
    should_retry: impl Fn(&CoreError) -> bool,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && should_retry(&err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %err,
                    "retrying after classified failure"
                );
                tokio::time::sleep(config.delay()).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Convenience wrapper using [`CoreError::is_retryable`] as the classifier -- the
/// default policy described in §4.4: transient backend faults retry, everything else
/// does not.
pub async fn execute_default<T, F, Fut>(config: &RetryConfig, op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    execute(config, CoreError::is_retryable, op).await
}

/// A [`RetryConfig`] with `delay_ms` pinned to zero, for fast unit tests that want to
/// exercise the attempt loop without the real-time cost.
#[cfg(test)]
pub(crate) fn instant_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        delay_ms: 100,
    }
}
