//! In-process topic/channel registry
//!
//! Every (topic, channel) pair owns a route: a delivery sender while a
//! consumer is attached, and a backlog of messages published or requeued
//! while nothing is attached. Publishing fans a message out to every channel
//! of its topic, one copy per channel.

use crate::broker::error::BrokerResult;
use crate::broker::traits::{Acknowledger, Delivery, MessageId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Redelivery attempts after which a requeued message is dropped
pub const DEFAULT_MAX_ATTEMPTS: u16 = 5;

/// Acknowledgement counters for one channel
#[derive(Debug, Default)]
pub struct AckStats {
    finished: AtomicUsize,
    requeued: AtomicUsize,
    dropped: AtomicUsize,
}

/// Point-in-time copy of [`AckStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckSnapshot {
    pub finished: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl AckStats {
    pub fn snapshot(&self) -> AckSnapshot {
        AckSnapshot {
            finished: self.finished.load(Ordering::Acquire),
            requeued: self.requeued.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug)]
struct PendingMessage {
    id: MessageId,
    body: Vec<u8>,
    attempts: u16,
}

#[derive(Default)]
struct ChannelRoute {
    sender: Option<mpsc::Sender<Delivery>>,
    backlog: VecDeque<PendingMessage>,
    stats: Arc<AckStats>,
}

/// Registry of topics and channels, standing in for a broker's lookup service
pub struct MemoryLookup {
    routes: Mutex<HashMap<String, HashMap<String, ChannelRoute>>>,
    next_id: AtomicU64,
    max_attempts: u16,
    self_ref: Weak<MemoryLookup>,
}

impl MemoryLookup {
    pub fn new() -> Arc<Self> {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u16) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            routes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_attempts: max_attempts.max(1),
            self_ref: self_ref.clone(),
        })
    }

    pub fn max_attempts(&self) -> u16 {
        self.max_attempts
    }

    /// Channels currently known for a topic
    pub fn channels(&self, topic: &str) -> Vec<String> {
        let routes = self.routes.lock().unwrap();
        let mut channels: Vec<String> = routes
            .get(topic)
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Number of messages waiting for a consumer to attach to (topic, channel)
    pub fn backlog_len(&self, topic: &str, channel: &str) -> usize {
        let routes = self.routes.lock().unwrap();
        routes
            .get(topic)
            .and_then(|channels| channels.get(channel))
            .map(|route| route.backlog.len())
            .unwrap_or(0)
    }

    /// Create the (topic, channel) route if needed and return its ack counters
    pub(crate) fn declare(&self, topic: &str, channel: &str) -> Arc<AckStats> {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .entry(topic.to_string())
            .or_default()
            .entry(channel.to_string())
            .or_default();
        Arc::clone(&route.stats)
    }

    /// Attach a consumer's delivery sender and flush any backlog into it
    pub(crate) fn attach(&self, topic: &str, channel: &str, sender: mpsc::Sender<Delivery>) {
        let (backlog, stats) = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .entry(topic.to_string())
                .or_default()
                .entry(channel.to_string())
                .or_default();
            route.sender = Some(sender.clone());
            (
                route.backlog.drain(..).collect::<Vec<_>>(),
                Arc::clone(&route.stats),
            )
        };

        if backlog.is_empty() {
            return;
        }
        log::debug!(
            "Flushing {} backlogged messages to {}/{}",
            backlog.len(),
            topic,
            channel
        );
        for pending in backlog {
            let delivery = self.build_delivery(topic, channel, pending, &stats);
            self.spawn_send(topic, channel, sender.clone(), delivery, Duration::ZERO);
        }
    }

    /// Detach the consumer sender; subsequent messages are backlogged
    pub(crate) fn detach(&self, topic: &str, channel: &str) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.get_mut(topic).and_then(|c| c.get_mut(channel)) {
            route.sender = None;
        }
    }

    /// Return an undelivered message to the backlog without counting an attempt
    pub(crate) fn restore(&self, topic: &str, channel: &str, delivery: Delivery) {
        self.push_backlog(
            topic,
            channel,
            PendingMessage {
                id: delivery.id(),
                body: delivery.body().to_vec(),
                attempts: delivery.attempts(),
            },
        );
    }

    /// Publish one message to every channel of `topic`
    ///
    /// Blocks while an attached channel is full. Returns the number of
    /// channels the message was routed to; a topic without channels drops it.
    pub async fn publish(&self, topic: &str, body: Vec<u8>) -> BrokerResult<usize> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let targets: Vec<(String, Option<mpsc::Sender<Delivery>>, Arc<AckStats>)> = {
            let routes = self.routes.lock().unwrap();
            match routes.get(topic) {
                Some(channels) => channels
                    .iter()
                    .map(|(name, route)| {
                        (name.clone(), route.sender.clone(), Arc::clone(&route.stats))
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            log::debug!("Topic '{}' has no channels, message {} dropped", topic, id);
            return Ok(0);
        }

        for (channel, sender, stats) in &targets {
            let pending = PendingMessage {
                id,
                body: body.clone(),
                attempts: 1,
            };
            match sender {
                Some(sender) => {
                    let delivery = self.build_delivery(topic, channel, pending, stats);
                    if let Err(mpsc::error::SendError(delivery)) = sender.send(delivery).await {
                        self.restore(topic, channel, delivery);
                    }
                }
                None => self.push_backlog(topic, channel, pending),
            }
        }
        Ok(targets.len())
    }

    fn redeliver(&self, topic: &str, channel: &str, pending: PendingMessage, delay: Duration) {
        let (sender, stats) = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .entry(topic.to_string())
                .or_default()
                .entry(channel.to_string())
                .or_default();
            (route.sender.clone(), Arc::clone(&route.stats))
        };
        match sender {
            Some(sender) => {
                let delivery = self.build_delivery(topic, channel, pending, &stats);
                self.spawn_send(topic, channel, sender, delivery, delay);
            }
            None => self.push_backlog(topic, channel, pending),
        }
    }

    fn push_backlog(&self, topic: &str, channel: &str, pending: PendingMessage) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(topic.to_string())
            .or_default()
            .entry(channel.to_string())
            .or_default()
            .backlog
            .push_back(pending);
    }

    fn spawn_send(
        &self,
        topic: &str,
        channel: &str,
        sender: mpsc::Sender<Delivery>,
        delivery: Delivery,
        delay: Duration,
    ) {
        let lookup = self.self_ref.clone();
        let topic = topic.to_string();
        let channel = channel.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(mpsc::error::SendError(delivery)) = sender.send(delivery).await {
                if let Some(lookup) = lookup.upgrade() {
                    lookup.restore(&topic, &channel, delivery);
                }
            }
        });
    }

    fn build_delivery(
        &self,
        topic: &str,
        channel: &str,
        pending: PendingMessage,
        stats: &Arc<AckStats>,
    ) -> Delivery {
        let acknowledger = Arc::new(MemoryAcknowledger {
            lookup: self.self_ref.clone(),
            topic: topic.to_string(),
            channel: channel.to_string(),
            body: pending.body.clone(),
            attempts: pending.attempts,
            max_attempts: self.max_attempts,
            stats: Arc::clone(stats),
        });
        Delivery::new(pending.id, pending.body, pending.attempts, acknowledger)
    }
}

struct MemoryAcknowledger {
    lookup: Weak<MemoryLookup>,
    topic: String,
    channel: String,
    body: Vec<u8>,
    attempts: u16,
    max_attempts: u16,
    stats: Arc<AckStats>,
}

impl Acknowledger for MemoryAcknowledger {
    fn finish(&self, _id: MessageId) {
        self.stats.finished.fetch_add(1, Ordering::AcqRel);
    }

    fn requeue(&self, id: MessageId, delay: Duration, _backoff: bool) {
        self.stats.requeued.fetch_add(1, Ordering::AcqRel);

        if self.attempts >= self.max_attempts {
            self.stats.dropped.fetch_add(1, Ordering::AcqRel);
            log::warn!(
                "Message {} on {}/{} reached {} attempts, dropping",
                id,
                self.topic,
                self.channel,
                self.attempts
            );
            return;
        }

        match self.lookup.upgrade() {
            Some(lookup) => lookup.redeliver(
                &self.topic,
                &self.channel,
                PendingMessage {
                    id,
                    body: self.body.clone(),
                    attempts: self.attempts + 1,
                },
                delay,
            ),
            None => {
                self.stats.dropped.fetch_add(1, Ordering::AcqRel);
                log::debug!("Lookup gone, message {} cannot be requeued", id);
            }
        }
    }
}
