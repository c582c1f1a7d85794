//! Producer Error Types

use crate::broker::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Topic '{topic}' is not allowed to be published by this producer")]
    TopicNotAllowed { topic: String },

    #[error("Broker rejected publish: {0}")]
    Backend(#[from] BrokerError),
}

impl crate::core::error_handling::ContextualError for ProducerError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, ProducerError::TopicNotAllowed { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ProducerError::TopicNotAllowed { .. } => {
                Some("Add the topic to producer.topics in the configuration")
            }
            _ => None,
        }
    }
}

/// Result type for producer operations
pub type ProducerResult<T> = Result<T, ProducerError>;
