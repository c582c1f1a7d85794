//! Broker boundary
//!
//! Traits the consumer runtime consumes from a broker client library, plus an
//! in-process [`memory`] broker used by tests and the `simulate` command.

pub(crate) mod error;
pub mod memory;
pub(crate) mod traits;

pub use error::{BrokerError, BrokerResult};
pub use traits::{
    Acknowledger, ConsumerBackend, Delivery, DeliveryHandler, MessageId, ProducerBackend,
};

#[cfg(test)]
mod tests;
