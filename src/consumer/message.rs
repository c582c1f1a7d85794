//! Message Types for the Consumer Runtime
//!
//! A [`Message`] wraps one broker [`Delivery`] together with the
//! subscription it arrived on and the pool observability fields in [`Info`].
//! The worker pool owns the message while it is queued and lends it to the
//! handler chain as `&mut Message` for the duration of the call.

use crate::broker::{Delivery, MessageId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Pool metadata stamped on a message when a worker picks it up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Info {
    /// Configured concurrency of the owning pool
    pub worker_total: usize,
    /// Ordinal (1-based) of the worker that picked the message up
    pub worker_current: usize,
    /// Queue depth observed at hand-off
    pub message_in_buffer: usize,
    /// The owning pool was throttled when the message was handed off
    pub throttle_flag: bool,
    /// The throttle interceptor acted on `throttle_flag` for this message
    pub throttled: bool,
}

/// Typed per-message values that interceptors pass down the chain
#[derive(Default)]
pub struct Extensions {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Insert a value, returning the previous value of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok().map(|boxed| *boxed))
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok().map(|boxed| *boxed))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.values.len())
            .finish()
    }
}

/// A broker-delivered message bound to its (topic, channel) subscription
#[derive(Debug)]
pub struct Message {
    pub topic: String,
    pub channel: String,
    pub info: Info,
    extensions: Extensions,
    delivery: Delivery,
}

impl Message {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>, delivery: Delivery) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
            info: Info::default(),
            extensions: Extensions::default(),
            delivery,
        }
    }

    pub fn id(&self) -> MessageId {
        self.delivery.id()
    }

    /// Opaque payload bytes as delivered by the broker
    pub fn payload(&self) -> &[u8] {
        self.delivery.body()
    }

    pub fn attempts(&self) -> u16 {
        self.delivery.attempts()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.delivery.timestamp()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Acknowledge the message to the broker
    ///
    /// Handlers normally leave this to the worker, which finishes on `Ok`
    /// and requeues on `Err`. Returns false if a response was already sent.
    pub fn finish(&self) -> bool {
        self.delivery.finish()
    }

    pub fn requeue(&self, delay: Duration) -> bool {
        self.delivery.requeue(delay)
    }

    pub fn requeue_without_backoff(&self, delay: Duration) -> bool {
        self.delivery.requeue_without_backoff(delay)
    }

    /// Extend the broker-side processing timeout
    pub fn touch(&self) {
        self.delivery.touch()
    }

    pub fn has_responded(&self) -> bool {
        self.delivery.has_responded()
    }
}
