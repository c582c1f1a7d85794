//! Broker Boundary Traits
//!
//! The consumer runtime never talks to a broker directly. It consumes the
//! traits in this module, which a broker client library (or the in-process
//! [`memory`](crate::broker::memory) broker) implements.
//!
//! # Delivery flow
//!
//! ```text
//! broker client ──handle_delivery──▶ DeliveryHandler (FlowController)
//!        ▲                                   │ push
//!        │ finish / requeue                  ▼
//!   Acknowledger ◀──── worker ◀──── bounded pool queue
//! ```

use crate::broker::error::BrokerResult;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Broker-assigned message identifier
pub type MessageId = u64;

/// Broker-side response channel for a single delivery
///
/// Implemented by the broker client. Exactly one of `finish`/`requeue`
/// reaches the implementation per delivery; [`Delivery`] enforces that.
pub trait Acknowledger: Send + Sync {
    /// Message was processed successfully and can be discarded by the broker
    fn finish(&self, id: MessageId);

    /// Message should be delivered again after `delay`
    ///
    /// `backoff` signals whether the broker client should also enter its
    /// own backoff state for the subscription.
    fn requeue(&self, id: MessageId, delay: Duration, backoff: bool);

    /// Reset the broker-side processing timeout for the message
    fn touch(&self, _id: MessageId) {}
}

/// A single message as delivered by the broker client
pub struct Delivery {
    id: MessageId,
    body: Vec<u8>,
    attempts: u16,
    timestamp: SystemTime,
    responded: AtomicBool,
    acknowledger: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        id: MessageId,
        body: Vec<u8>,
        attempts: u16,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            id,
            body,
            attempts,
            timestamp: SystemTime::now(),
            responded: AtomicBool::new(false),
            acknowledger,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of times the broker has attempted this message (starting at 1)
    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Whether `finish` or a `requeue` variant has already been sent
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Acknowledge successful processing. Returns false if already responded.
    pub fn finish(&self) -> bool {
        if self.mark_responded() {
            self.acknowledger.finish(self.id);
            true
        } else {
            log::debug!("Delivery {} already responded, ignoring finish", self.id);
            false
        }
    }

    /// Ask the broker to redeliver after `delay`, entering broker backoff.
    pub fn requeue(&self, delay: Duration) -> bool {
        self.respond_requeue(delay, true)
    }

    /// Ask the broker to redeliver after `delay` without broker backoff.
    pub fn requeue_without_backoff(&self, delay: Duration) -> bool {
        self.respond_requeue(delay, false)
    }

    pub fn touch(&self) {
        if !self.has_responded() {
            self.acknowledger.touch(self.id);
        }
    }

    fn respond_requeue(&self, delay: Duration, backoff: bool) -> bool {
        if self.mark_responded() {
            self.acknowledger.requeue(self.id, delay, backoff);
            true
        } else {
            log::debug!("Delivery {} already responded, ignoring requeue", self.id);
            false
        }
    }

    fn mark_responded(&self) -> bool {
        self.responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("body_len", &self.body.len())
            .field("attempts", &self.attempts)
            .field("responded", &self.has_responded())
            .finish()
    }
}

/// Callback the broker client invokes for every delivered message
///
/// The broker client does not deliver the next message on the same reader
/// until this call returns, which is what lets the implementation throttle
/// upstream delivery by simply not returning.
#[async_trait::async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle_delivery(&self, delivery: Delivery) -> BrokerResult<()>;
}

/// Consumer side of a broker client, bound to one (topic, channel)
#[async_trait::async_trait]
pub trait ConsumerBackend: Send + Sync {
    fn topic(&self) -> &str;

    fn channel(&self) -> &str;

    /// Configured worker concurrency; non-positive means "use the default"
    fn concurrency(&self) -> i64;

    /// Configured buffer multiplier; non-positive means "use the default"
    fn buffer_multiplier(&self) -> i64;

    /// Register a single-reader delivery callback
    fn add_handler(&self, handler: Arc<dyn DeliveryHandler>);

    /// Register a delivery callback served by `concurrency` readers
    fn add_concurrent_handlers(&self, handler: Arc<dyn DeliveryHandler>, concurrency: usize);

    async fn connect_to_lookups(&self, addresses: &[String]) -> BrokerResult<()>;

    /// Change how many unacknowledged messages the broker may push; 0 pauses delivery
    fn change_max_in_flight(&self, max_in_flight: usize);

    async fn stop(&self);
}

/// Producer side of a broker client
#[async_trait::async_trait]
pub trait ProducerBackend: Send + Sync {
    async fn ping(&self) -> BrokerResult<()>;

    async fn publish(&self, topic: &str, body: Vec<u8>) -> BrokerResult<()>;

    async fn multi_publish(&self, topic: &str, bodies: Vec<Vec<u8>>) -> BrokerResult<()>;

    async fn stop(&self);
}
