//! Retry helper for transient broker failures
//!
//! The consumer runtime never retries on its own; this is for callers such
//! as the binary, which pings the producer backend before publishing.

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy with a doubling delay between attempts, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is used up
///
/// At least one attempt is always made. The last error is returned.
///
/// ```rust
/// use msgflow::broker::memory::{MemoryLookup, MemoryProducer};
/// use msgflow::core::retry::{retry_async, RetryPolicy};
/// use msgflow::producer::Producer;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), msgflow::producer::ProducerError> {
/// let producer = Producer::wrap(Arc::new(MemoryProducer::new(MemoryLookup::new())), ["orders"]);
/// retry_async("producer ping", RetryPolicy::default(), || producer.ping()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_async<F, T, E, Fut>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if attempt >= max_attempts => return Err(error),
            Err(error) => {
                let delay = policy.delay_after(attempt);
                log::debug!(
                    "Operation '{}' failed on attempt {}/{}, retrying in {:?}: {}",
                    operation_name,
                    attempt,
                    max_attempts,
                    delay,
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
