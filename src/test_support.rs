//! Shared fakes for unit tests

use crate::broker::{
    Acknowledger, BrokerError, BrokerResult, ConsumerBackend, Delivery, DeliveryHandler,
    MessageId, ProducerBackend,
};
use crate::consumer::Message;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Broker response recorded by [`RecordingAcknowledger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Finish(MessageId),
    Requeue {
        id: MessageId,
        delay: Duration,
        backoff: bool,
    },
    Touch(MessageId),
}

#[derive(Default)]
pub struct RecordingAcknowledger {
    acks: Mutex<Vec<Ack>>,
}

impl RecordingAcknowledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acks(&self) -> Vec<Ack> {
        self.acks.lock().unwrap().clone()
    }

    pub fn finished(&self) -> usize {
        self.acks()
            .iter()
            .filter(|ack| matches!(ack, Ack::Finish(_)))
            .count()
    }

    pub fn requeued(&self) -> usize {
        self.acks()
            .iter()
            .filter(|ack| matches!(ack, Ack::Requeue { .. }))
            .count()
    }
}

impl Acknowledger for RecordingAcknowledger {
    fn finish(&self, id: MessageId) {
        self.acks.lock().unwrap().push(Ack::Finish(id));
    }

    fn requeue(&self, id: MessageId, delay: Duration, backoff: bool) {
        self.acks
            .lock()
            .unwrap()
            .push(Ack::Requeue { id, delay, backoff });
    }

    fn touch(&self, id: MessageId) {
        self.acks.lock().unwrap().push(Ack::Touch(id));
    }
}

pub fn delivery(id: MessageId, body: &[u8], acker: &Arc<RecordingAcknowledger>) -> Delivery {
    Delivery::new(id, body.to_vec(), 1, acker.clone())
}

pub fn message(id: MessageId, body: &[u8], acker: &Arc<RecordingAcknowledger>) -> Message {
    Message::new("orders", "billing", delivery(id, body, acker))
}

/// [`ConsumerBackend`] that records calls and never delivers on its own
///
/// Tests call [`deliver`](Self::deliver) to push a delivery through the
/// registered handler.
pub struct FakeBackend {
    topic: String,
    channel: String,
    concurrency: i64,
    buffer_multiplier: i64,
    pub handlers: Mutex<Vec<(Arc<dyn DeliveryHandler>, usize)>>,
    pub max_in_flight: Mutex<Vec<usize>>,
    pub connects: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_connect: AtomicBool,
}

impl FakeBackend {
    pub fn new(topic: &str, channel: &str) -> Self {
        Self {
            topic: topic.to_string(),
            channel: channel.to_string(),
            concurrency: 0,
            buffer_multiplier: 0,
            handlers: Mutex::new(Vec::new()),
            max_in_flight: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn with_sizes(mut self, concurrency: i64, buffer_multiplier: i64) -> Self {
        self.concurrency = concurrency;
        self.buffer_multiplier = buffer_multiplier;
        self
    }

    pub fn max_in_flight_history(&self) -> Vec<usize> {
        self.max_in_flight.lock().unwrap().clone()
    }

    pub fn handler_registrations(&self) -> Vec<usize> {
        self.handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, readers)| *readers)
            .collect()
    }

    pub async fn deliver(&self, delivery: Delivery) -> BrokerResult<()> {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .first()
            .map(|(handler, _)| handler.clone())
            .ok_or_else(|| BrokerError::NoHandlers {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
            })?;
        handler.handle_delivery(delivery).await
    }
}

#[async_trait::async_trait]
impl ConsumerBackend for FakeBackend {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn concurrency(&self) -> i64 {
        self.concurrency
    }

    fn buffer_multiplier(&self) -> i64 {
        self.buffer_multiplier
    }

    fn add_handler(&self, handler: Arc<dyn DeliveryHandler>) {
        self.handlers.lock().unwrap().push((handler, 1));
    }

    fn add_concurrent_handlers(&self, handler: Arc<dyn DeliveryHandler>, concurrency: usize) {
        self.handlers.lock().unwrap().push((handler, concurrency));
    }

    async fn connect_to_lookups(&self, addresses: &[String]) -> BrokerResult<()> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        if self.fail_connect.load(Ordering::Acquire) {
            return Err(BrokerError::Connection {
                address: addresses.join(","),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn change_max_in_flight(&self, max_in_flight: usize) {
        self.max_in_flight.lock().unwrap().push(max_in_flight);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
    }
}

/// [`ProducerBackend`] recording every publish
#[derive(Default)]
pub struct RecordingProducer {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub pings: AtomicUsize,
    pub stopped: AtomicBool,
}

#[async_trait::async_trait]
impl ProducerBackend for RecordingProducer {
    async fn ping(&self) -> BrokerResult<()> {
        self.pings.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn publish(&self, topic: &str, body: Vec<u8>) -> BrokerResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), body));
        Ok(())
    }

    async fn multi_publish(&self, topic: &str, bodies: Vec<Vec<u8>>) -> BrokerResult<()> {
        let mut published = self.published.lock().unwrap();
        for body in bodies {
            published.push((topic.to_string(), body));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
