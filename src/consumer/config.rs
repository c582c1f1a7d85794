//! Consumer runtime configuration

use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::DEFAULT_BUFFER_MULTIPLIER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between queue-depth checks while throttled
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings shared by every subscription of a [`Consumer`](crate::consumer::Consumer)
///
/// `concurrency` and `buffer_multiplier` are fallbacks; a backend reporting a
/// positive value of its own wins. Non-positive values mean "use the default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Broker discovery addresses passed to every backend on start
    pub lookup_addresses: Vec<String>,
    pub concurrency: i64,
    pub buffer_multiplier: i64,
    /// Queue-depth re-check interval while throttled, in milliseconds
    pub poll_interval_ms: u64,
    /// Delay passed to the broker when a failed message is requeued, in milliseconds
    pub requeue_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lookup_addresses: Vec::new(),
            concurrency: 1,
            buffer_multiplier: DEFAULT_BUFFER_MULTIPLIER as i64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            requeue_delay_ms: 0,
        }
    }
}

impl ConsumerConfig {
    pub fn new<I, S>(lookup_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lookup_addresses: lookup_addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_buffer_multiplier(mut self, buffer_multiplier: i64) -> Self {
        self.buffer_multiplier = buffer_multiplier;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Poll interval, never zero
    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms == 0 {
            DEFAULT_POLL_INTERVAL
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    /// Reject a configuration without any usable lookup address
    pub fn validate(&self) -> ConsumerResult<()> {
        if self
            .lookup_addresses
            .iter()
            .all(|address| address.trim().is_empty())
        {
            return Err(ConsumerError::MissingLookupAddresses);
        }
        Ok(())
    }
}

