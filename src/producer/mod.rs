//! Allow-listed Producer
//!
//! [`Producer`] wraps a [`ProducerBackend`] and only forwards publishes for
//! topics declared when it was built. Rejected publishes never reach the
//! backend.
//!
//! # Example
//!
//! ```rust,no_run
//! use msgflow::broker::memory::{MemoryLookup, MemoryProducer};
//! use msgflow::producer::Producer;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryProducer::new(MemoryLookup::new()));
//! let producer = Producer::wrap(backend, ["orders"]);
//!
//! producer.publish("orders", b"{\"id\":1}".to_vec()).await?;
//! assert!(producer.publish("payments", Vec::new()).await.is_err());
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{ProducerError, ProducerResult};

use crate::broker::ProducerBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Outbound topic allow-list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub topics: Vec<String>,
}

pub struct Producer {
    backend: Arc<dyn ProducerBackend>,
    topics: HashSet<String>,
}

impl Producer {
    /// Wrap `backend`, allowing only `topics`; the set is fixed from here on
    pub fn wrap<I, S>(backend: Arc<dyn ProducerBackend>, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend,
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(backend: Arc<dyn ProducerBackend>, config: &ProducerConfig) -> Self {
        Self::wrap(backend, config.topics.iter().cloned())
    }

    /// Allowed topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_allowed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub async fn publish(&self, topic: &str, body: Vec<u8>) -> ProducerResult<()> {
        self.check_topic(topic)?;
        self.backend.publish(topic, body).await?;
        Ok(())
    }

    pub async fn multi_publish(&self, topic: &str, bodies: Vec<Vec<u8>>) -> ProducerResult<()> {
        self.check_topic(topic)?;
        self.backend.multi_publish(topic, bodies).await?;
        Ok(())
    }

    /// Check the backend connection
    pub async fn ping(&self) -> ProducerResult<()> {
        self.backend.ping().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.backend.stop().await;
    }

    fn check_topic(&self, topic: &str) -> ProducerResult<()> {
        if self.is_allowed(topic) {
            Ok(())
        } else {
            log::debug!("Rejected publish to undeclared topic '{}'", topic);
            Err(ProducerError::TopicNotAllowed {
                topic: topic.to_string(),
            })
        }
    }
}
