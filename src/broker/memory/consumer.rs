//! In-process consumer backend
//!
//! Readers pull deliveries from the channel route and call the registered
//! [`DeliveryHandler`]s. A reader does not pull the next delivery until the
//! handler returns, and no reader pulls while max-in-flight is 0.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::lookup::{AckSnapshot, AckStats, MemoryLookup};
use crate::broker::traits::{ConsumerBackend, Delivery, DeliveryHandler};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Broker max-in-flight before the runtime adjusts it
const INITIAL_MAX_IN_FLIGHT: usize = 1;

/// Deliveries buffered between the lookup and the readers
const DELIVERY_CHANNEL_SIZE: usize = 1;

/// Configuration for a [`MemoryConsumer`]
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConsumerConfig {
    pub topic: String,
    pub channel: String,
    pub concurrency: i64,
    pub buffer_multiplier: i64,
}

impl MemoryConsumerConfig {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_buffer_multiplier(mut self, buffer_multiplier: i64) -> Self {
        self.buffer_multiplier = buffer_multiplier;
        self
    }

    /// Reject empty names and fill in defaults for unset sizes
    pub fn validate(&mut self) -> BrokerResult<()> {
        if self.topic.is_empty() {
            return Err(BrokerError::InvalidConfig {
                message: "consumer topic cannot be empty".to_string(),
            });
        }
        if self.channel.is_empty() {
            return Err(BrokerError::InvalidConfig {
                message: "consumer channel cannot be empty".to_string(),
            });
        }
        if self.concurrency <= 0 {
            self.concurrency = 1;
        }
        if self.buffer_multiplier <= 0 {
            self.buffer_multiplier = crate::consumer::DEFAULT_BUFFER_MULTIPLIER as i64;
        }
        Ok(())
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>;

/// [`ConsumerBackend`] backed by a [`MemoryLookup`]
pub struct MemoryConsumer {
    config: MemoryConsumerConfig,
    lookup: Arc<MemoryLookup>,
    stats: Arc<AckStats>,
    handlers: Mutex<Vec<(Arc<dyn DeliveryHandler>, usize)>>,
    max_in_flight: watch::Sender<usize>,
    max_in_flight_history: Mutex<Vec<usize>>,
    stop_tx: watch::Sender<bool>,
    receiver: Mutex<Option<SharedReceiver>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    connected: AtomicBool,
    handler_errors: Arc<AtomicUsize>,
}

impl MemoryConsumer {
    pub fn new(lookup: Arc<MemoryLookup>, mut config: MemoryConsumerConfig) -> BrokerResult<Self> {
        config.validate()?;
        let stats = lookup.declare(&config.topic, &config.channel);
        let (max_in_flight, _) = watch::channel(INITIAL_MAX_IN_FLIGHT);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            lookup,
            stats,
            handlers: Mutex::new(Vec::new()),
            max_in_flight,
            max_in_flight_history: Mutex::new(Vec::new()),
            stop_tx,
            receiver: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            handler_errors: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &MemoryConsumerConfig {
        &self.config
    }

    /// Current max-in-flight value
    pub fn max_in_flight(&self) -> usize {
        *self.max_in_flight.borrow()
    }

    /// Every value passed to `change_max_in_flight`, in call order
    pub fn max_in_flight_history(&self) -> Vec<usize> {
        self.max_in_flight_history.lock().unwrap().clone()
    }

    /// Number of `change_max_in_flight(0)` calls so far
    pub fn pause_count(&self) -> usize {
        self.max_in_flight_history
            .lock()
            .unwrap()
            .iter()
            .filter(|n| **n == 0)
            .count()
    }

    pub fn ack_stats(&self) -> AckSnapshot {
        self.stats.snapshot()
    }

    /// Deliveries whose handler call returned an error
    pub fn handler_errors(&self) -> usize {
        self.handler_errors.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn register(&self, handler: Arc<dyn DeliveryHandler>, readers: usize) {
        self.handlers.lock().unwrap().push((handler, readers.max(1)));
    }
}

#[async_trait::async_trait]
impl ConsumerBackend for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.config.topic
    }

    fn channel(&self) -> &str {
        &self.config.channel
    }

    fn concurrency(&self) -> i64 {
        self.config.concurrency
    }

    fn buffer_multiplier(&self) -> i64 {
        self.config.buffer_multiplier
    }

    fn add_handler(&self, handler: Arc<dyn DeliveryHandler>) {
        self.register(handler, 1);
    }

    fn add_concurrent_handlers(&self, handler: Arc<dyn DeliveryHandler>, concurrency: usize) {
        self.register(handler, concurrency);
    }

    async fn connect_to_lookups(&self, addresses: &[String]) -> BrokerResult<()> {
        if self.is_stopped() {
            return Err(BrokerError::Stopped);
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handlers = self.handlers.lock().unwrap().clone();
        if handlers.is_empty() {
            self.connected.store(false, Ordering::Release);
            return Err(BrokerError::NoHandlers {
                topic: self.config.topic.clone(),
                channel: self.config.channel.clone(),
            });
        }

        log::debug!(
            "Memory consumer {}/{} connecting via {:?}",
            self.config.topic,
            self.config.channel,
            addresses
        );

        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_SIZE);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        *self.receiver.lock().unwrap() = Some(Arc::clone(&receiver));

        {
            let mut readers = self.readers.lock().unwrap();
            for (handler, count) in handlers {
                for _ in 0..count {
                    readers.push(tokio::spawn(run_reader(
                        Arc::clone(&handler),
                        Arc::clone(&receiver),
                        self.max_in_flight.subscribe(),
                        self.stop_tx.subscribe(),
                        Arc::clone(&self.handler_errors),
                    )));
                }
            }
        }

        self.lookup
            .attach(&self.config.topic, &self.config.channel, tx);
        Ok(())
    }

    fn change_max_in_flight(&self, max_in_flight: usize) {
        log::trace!(
            "Memory consumer {}/{} max-in-flight -> {}",
            self.config.topic,
            self.config.channel,
            max_in_flight
        );
        self.max_in_flight_history
            .lock()
            .unwrap()
            .push(max_in_flight);
        self.max_in_flight.send_replace(max_in_flight);
    }

    async fn stop(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        self.lookup.detach(&self.config.topic, &self.config.channel);

        let readers: Vec<JoinHandle<()>> = self.readers.lock().unwrap().drain(..).collect();
        for reader in readers {
            if let Err(e) = reader.await {
                log::warn!("Memory consumer reader ended abnormally: {}", e);
            }
        }

        // Deliveries still buffered go back to the lookup untouched
        let receiver = self.receiver.lock().unwrap().take();
        if let Some(receiver) = receiver {
            let mut receiver = receiver.lock().await;
            receiver.close();
            while let Ok(delivery) = receiver.try_recv() {
                self.lookup
                    .restore(&self.config.topic, &self.config.channel, delivery);
            }
        }
        self.connected.store(false, Ordering::Release);
        log::debug!(
            "Memory consumer {}/{} stopped",
            self.config.topic,
            self.config.channel
        );
    }
}

async fn run_reader(
    handler: Arc<dyn DeliveryHandler>,
    receiver: SharedReceiver,
    mut max_in_flight: watch::Receiver<usize>,
    mut stop: watch::Receiver<bool>,
    handler_errors: Arc<AtomicUsize>,
) {
    loop {
        // Paused while max-in-flight is 0
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => return,
            resumed = max_in_flight.wait_for(|n| *n > 0) => {
                if resumed.is_err() {
                    return;
                }
            }
        }

        let delivery = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => return,
            delivery = async { receiver.lock().await.recv().await } => match delivery {
                Some(delivery) => delivery,
                None => return,
            },
        };

        if let Err(e) = handler.handle_delivery(delivery).await {
            handler_errors.fetch_add(1, Ordering::AcqRel);
            log::warn!("Delivery handler returned an error: {}", e);
        }
    }
}
