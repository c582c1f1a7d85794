//! Load simulation against the in-process broker
//!
//! Publishes a burst of messages into a [`MemoryLookup`] and consumes them
//! through a [`Consumer`] with the metrics and throttle interceptors, so the
//! backpressure behaviour can be observed without a network broker.

use crate::app::cli::config::{AppConfig, SimulationConfig};
use crate::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup, MemoryProducer};
use crate::broker::{BrokerError, ConsumerBackend};
use crate::consumer::{Consumer, ConsumerError, Handler, HandlerResult, Message};
use crate::core::error_handling::ContextualError;
use crate::core::retry::{retry_async, RetryPolicy};
use crate::core::shutdown::ShutdownSignal;
use crate::middleware::{Metrics, Throttle};
use crate::producer::{Producer, ProducerError};
use crate::telemetry::RecordingSink;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between completion checks
const PROGRESS_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}

impl ContextualError for SimulationError {
    fn is_user_actionable(&self) -> bool {
        match self {
            SimulationError::Broker(e) => e.is_user_actionable(),
            SimulationError::Consumer(e) => e.is_user_actionable(),
            SimulationError::Producer(e) => e.is_user_actionable(),
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            SimulationError::Broker(e) => e.user_message(),
            SimulationError::Consumer(e) => e.user_message(),
            SimulationError::Producer(e) => e.user_message(),
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub topic: String,
    pub channel: String,
    pub buffer_length: usize,
    pub published: usize,
    pub finished: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub handler_errors: u64,
    pub throttled_messages: usize,
    pub pause_count: usize,
    pub max_in_flight_history: Vec<usize>,
    pub peak_buffer: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subscription:      {}/{}", self.topic, self.channel)?;
        writeln!(f, "Buffer length:     {}", self.buffer_length)?;
        writeln!(f, "Published:         {}", self.published)?;
        writeln!(f, "Finished:          {}", self.finished)?;
        writeln!(f, "Requeued:          {}", self.requeued)?;
        writeln!(f, "Dropped:           {}", self.dropped)?;
        writeln!(f, "Handler errors:    {}", self.handler_errors)?;
        writeln!(f, "Throttled:         {}", self.throttled_messages)?;
        writeln!(f, "Pauses:            {}", self.pause_count)?;
        writeln!(f, "Max-in-flight:     {:?}", self.max_in_flight_history)?;
        writeln!(f, "Peak buffer depth: {}", self.peak_buffer)?;
        write!(f, "Elapsed:           {:.2?}", self.elapsed)?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Handler that sleeps and fails the first attempt of every Nth message id
struct SimulatedHandler {
    delay: Duration,
    fail_every: u64,
    errors: AtomicU64,
}

#[async_trait::async_trait]
impl Handler for SimulatedHandler {
    async fn handle(&self, message: &mut Message) -> HandlerResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_every > 0 && message.attempts() == 1 && message.id() % self.fail_every == 0 {
            self.errors.fetch_add(1, Ordering::AcqRel);
            return Err(format!("simulated failure for message {}", message.id()).into());
        }
        Ok(())
    }
}

/// Run the simulation described by `config.simulation`
///
/// Returns early, with `interrupted` set, when `shutdown` fires.
pub async fn run_simulation(
    config: &AppConfig,
    shutdown: ShutdownSignal,
) -> Result<SimulationReport, SimulationError> {
    let started = Instant::now();
    let sim: &SimulationConfig = &config.simulation;
    let lookup = MemoryLookup::new();

    let backend = Arc::new(MemoryConsumer::new(
        Arc::clone(&lookup),
        MemoryConsumerConfig::new(sim.topic.clone(), sim.channel.clone())
            .with_concurrency(sim.concurrency)
            .with_buffer_multiplier(sim.buffer_multiplier),
    )?);

    let sink = Arc::new(RecordingSink::new());
    let handler = Arc::new(SimulatedHandler {
        delay: Duration::from_millis(sim.handler_delay_ms),
        fail_every: sim.fail_every,
        errors: AtomicU64::new(0),
    });

    let backend_handle: Arc<dyn ConsumerBackend> = backend.clone();
    let mut consumer = Consumer::wrap(config.consumer.clone(), vec![backend_handle])?
        .with_metrics_sink(sink.clone());
    consumer
        .use_interceptor(Arc::new(Metrics::with_sink(sink.clone())))
        .use_interceptor(Arc::new(Throttle::new(Duration::from_millis(
            sim.throttle_delay_ms,
        ))));
    let pool = consumer.handle_arc(&sim.topic, &sim.channel, handler.clone());
    consumer.start().await?;

    let mut topics = config.producer.topics.clone();
    if !topics.contains(&sim.topic) {
        topics.push(sim.topic.clone());
    }
    let producer = Producer::wrap(Arc::new(MemoryProducer::new(Arc::clone(&lookup))), topics);
    retry_async("producer ping", RetryPolicy::default(), || producer.ping()).await?;

    log::info!(
        "Publishing {} messages to {} (buffer {})",
        sim.messages,
        sim.topic,
        pool.buffer_length()
    );

    let mut published = 0;
    let mut interrupted = false;
    for index in 0..sim.messages {
        let body = format!("{{\"sequence\":{}}}", index).into_bytes();
        tokio::select! {
            result = producer.publish(&sim.topic, body) => {
                result?;
                published += 1;
            }
            _ = shutdown.cancelled() => {
                interrupted = true;
                break;
            }
        }
    }

    while !interrupted {
        let stats = backend.ack_stats();
        if stats.finished + stats.dropped >= published {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => {}
            _ = shutdown.cancelled() => interrupted = true,
        }
    }

    if interrupted {
        log::warn!("Simulation interrupted after publishing {} messages", published);
    }
    consumer.stop().await?;
    producer.stop().await;

    let stats = backend.ack_stats();
    let samples = sink.samples(&sim.topic, &sim.channel);
    Ok(SimulationReport {
        topic: sim.topic.clone(),
        channel: sim.channel.clone(),
        buffer_length: pool.buffer_length(),
        published,
        finished: stats.finished,
        requeued: stats.requeued,
        dropped: stats.dropped,
        handler_errors: handler.errors.load(Ordering::Acquire),
        throttled_messages: samples.throttled_count(),
        pause_count: backend.pause_count(),
        max_in_flight_history: backend.max_in_flight_history(),
        peak_buffer: samples.max_in_buffer,
        interrupted,
        elapsed: started.elapsed(),
    })
}
