//! Consumer Runtime Error Types

use crate::broker::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Lookup addresses cannot be empty")]
    MissingLookupAddresses,

    #[error("Backend with topic '{topic}' and channel '{channel}' not found")]
    TopicChannelNotFound { topic: String, channel: String },

    #[error("Failed to connect {topic}/{channel} to lookups: {source}")]
    Connect {
        topic: String,
        channel: String,
        #[source]
        source: BrokerError,
    },

    #[error("Consumer is already running")]
    AlreadyStarted,

    #[error("Consumer has been stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("Consumer is shutting down")]
    ShuttingDown,

    #[error("Worker pool for {topic}/{channel} is closed")]
    PoolClosed { topic: String, channel: String },
}

impl crate::core::error_handling::ContextualError for ConsumerError {
    fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ConsumerError::MissingLookupAddresses | ConsumerError::TopicChannelNotFound { .. }
        )
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConsumerError::MissingLookupAddresses => {
                Some("No lookup addresses configured; set consumer.lookup_addresses")
            }
            ConsumerError::TopicChannelNotFound { .. } => Some(
                "A handler was registered for a topic/channel that has no consumer backend",
            ),
            _ => None,
        }
    }
}

impl From<ConsumerError> for BrokerError {
    fn from(error: ConsumerError) -> Self {
        BrokerError::DeliveryRejected {
            reason: error.to_string(),
        }
    }
}

/// Result type for consumer runtime operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;
