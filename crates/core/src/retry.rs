//! Bounded retry with exponential backoff
//!
//! Transient orchestrator failures (inspect timeouts, runtime CLI hiccups)
//! are retried a bounded number of times with exponential backoff and full
//! jitter. Terminal errors are surfaced immediately; nothing is ever retried
//! indefinitely.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding the initial attempt)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Backoff delay for a 0-based attempt number: `base * 2^attempt`, capped
    /// at `max_delay`, with full jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.pow(attempt.min(32)));
        let capped = exponential.min(self.max_delay.as_millis()) as u64;
        Duration::from_millis(fastrand::u64(0..=capped))
    }
}

/// Retry an async operation, re-running it only while `is_transient` holds
/// for the returned error.
pub async fn retry_async<T, E, Fut, Op, C>(
    config: &RetryConfig,
    mut operation: Op,
    is_transient: C,
) -> std::result::Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..=config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_transient(&error) {
                    debug!(%error, "terminal error, not retrying");
                    return Err(error);
                }

                debug!(attempt, %error, "transient failure");
                last_error = Some(error);

                if attempt < config.max_attempts {
                    let delay = config.delay_for(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let final_error = last_error.expect("at least one attempt was made");
    warn!(
        attempts = config.max_attempts + 1,
        %final_error,
        "all retry attempts exhausted"
    );
    Err(final_error)
}
