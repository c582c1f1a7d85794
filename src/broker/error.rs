//! Broker Boundary Error Types

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Backend for topic '{topic}' channel '{channel}' has no handlers registered")]
    NoHandlers { topic: String, channel: String },

    #[error("Backend has been stopped")]
    Stopped,

    #[error("Failed to connect to lookup '{address}': {message}")]
    Connection { address: String, message: String },

    #[error("Delivery rejected: {reason}")]
    DeliveryRejected { reason: String },

    #[error("Invalid backend configuration: {message}")]
    InvalidConfig { message: String },
}

impl crate::core::error_handling::ContextualError for BrokerError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, BrokerError::InvalidConfig { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            BrokerError::InvalidConfig { message } => Some(message),
            _ => None,
        }
    }
}

/// Result type for broker boundary operations
pub type BrokerResult<T> = Result<T, BrokerError>;
