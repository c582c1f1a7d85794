//! Error reporting for fatal failures
//!
//! Every domain error (`BrokerError`, `ConsumerError`, `ProducerError`,
//! `ConfigError`) implements [`ContextualError`] so the binary can report a
//! failed start the same way whatever module it came from.

/// Errors that know whether the user can fix them
///
/// When `is_user_actionable()` returns `true`, `user_message()` should return
/// `Some(message)` with a short actionable message; otherwise `None`.
pub trait ContextualError: std::error::Error {
    /// True for configuration and usage mistakes, false for runtime failures
    fn is_user_actionable(&self) -> bool;

    fn user_message(&self) -> Option<&str>;
}

/// Log a fatal error at the right level of detail
///
/// User-actionable errors log their own message; anything else logs
/// `operation_context`. Full details always go to debug.
///
/// ```rust,no_run
/// use msgflow::consumer::ConsumerError;
/// use msgflow::core::error_handling::log_error_with_context;
///
/// let error = ConsumerError::MissingLookupAddresses;
/// log_error_with_context(&error, "Starting consumer");
/// // FATAL: No lookup addresses configured; set consumer.lookup_addresses
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message().filter(|_| error.is_user_actionable()) {
        Some(user_msg) => log::error!("FATAL: {}", user_msg),
        None => log::error!("FATAL: {}: {}", operation_context, error),
    }
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::consumer::ConsumerError;
    use crate::producer::ProducerError;

    #[test]
    fn test_configuration_errors_are_user_actionable() {
        let missing = ConsumerError::MissingLookupAddresses;
        assert!(missing.is_user_actionable());
        assert!(missing.user_message().is_some());

        let not_found = ConsumerError::TopicChannelNotFound {
            topic: "orders".to_string(),
            channel: "billing".to_string(),
        };
        assert!(not_found.is_user_actionable());

        let not_allowed = ProducerError::TopicNotAllowed {
            topic: "payments".to_string(),
        };
        assert!(not_allowed.is_user_actionable());
        assert!(not_allowed.user_message().is_some());
    }

    #[test]
    fn test_runtime_errors_are_not_user_actionable() {
        let errors: Vec<Box<dyn ContextualError>> = vec![
            Box::new(ConsumerError::ShuttingDown),
            Box::new(BrokerError::Stopped),
            Box::new(ProducerError::Backend(BrokerError::Connection {
                address: "127.0.0.1:4161".to_string(),
                message: "connection refused".to_string(),
            })),
        ];
        for error in errors {
            assert!(!error.is_user_actionable(), "{} should be a system error", error);
            assert_eq!(error.user_message(), None);
        }
    }

    #[test]
    fn test_connect_error_keeps_broker_source() {
        use std::error::Error;

        let error = ConsumerError::Connect {
            topic: "orders".to_string(),
            channel: "billing".to_string(),
            source: BrokerError::Stopped,
        };
        let source = error.source().expect("connect error should carry its source");
        assert_eq!(source.to_string(), "Backend has been stopped");
        log_error_with_context(&error, "Starting consumer");
    }
}
