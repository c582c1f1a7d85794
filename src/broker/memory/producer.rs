//! In-process producer backend

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::lookup::MemoryLookup;
use crate::broker::traits::ProducerBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// [`ProducerBackend`] that publishes into a [`MemoryLookup`]
///
/// `publish` blocks while an attached channel is full, the same way a
/// consumer that stopped reading blocks a broker connection.
pub struct MemoryProducer {
    lookup: Arc<MemoryLookup>,
    stopped: AtomicBool,
}

impl MemoryProducer {
    pub fn new(lookup: Arc<MemoryLookup>) -> Self {
        Self {
            lookup,
            stopped: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> BrokerResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(BrokerError::Stopped)
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl ProducerBackend for MemoryProducer {
    async fn ping(&self) -> BrokerResult<()> {
        self.ensure_running()
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> BrokerResult<()> {
        self.ensure_running()?;
        self.lookup.publish(topic, body).await.map(|_| ())
    }

    async fn multi_publish(&self, topic: &str, bodies: Vec<Vec<u8>>) -> BrokerResult<()> {
        for body in bodies {
            self.publish(topic, body).await?;
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
