//! Common test utilities and helpers
//!
//! Builders for in-process broker subscriptions and a polling wait.

#![allow(dead_code)]

use msgflow::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup};
use msgflow::broker::ConsumerBackend;
use msgflow::consumer::ConsumerConfig;
use std::sync::Arc;
use std::time::Duration;

pub const LOOKUP: &str = "memory://local";

/// Consumer configuration with a short drain poll interval
pub fn consumer_config() -> ConsumerConfig {
    ConsumerConfig::new([LOOKUP]).with_poll_interval(Duration::from_millis(10))
}

pub fn memory_consumer(
    lookup: &Arc<MemoryLookup>,
    topic: &str,
    channel: &str,
    concurrency: i64,
    buffer_multiplier: i64,
) -> Arc<MemoryConsumer> {
    Arc::new(
        MemoryConsumer::new(
            Arc::clone(lookup),
            MemoryConsumerConfig::new(topic, channel)
                .with_concurrency(concurrency)
                .with_buffer_multiplier(buffer_multiplier),
        )
        .expect("valid memory consumer config"),
    )
}

pub fn as_backend(consumer: &Arc<MemoryConsumer>) -> Arc<dyn ConsumerBackend> {
    consumer.clone()
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
