//! Consumer registry
//!
//! Binds (topic, channel) subscriptions to broker backends, owns the
//! interceptor list, and starts and stops every worker pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use msgflow::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup};
//! use msgflow::consumer::{handler_fn, Consumer, ConsumerConfig, Message};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let lookup = MemoryLookup::new();
//! let backend = Arc::new(MemoryConsumer::new(
//!     lookup.clone(),
//!     MemoryConsumerConfig::new("orders", "billing"),
//! )?);
//!
//! let mut consumer = Consumer::wrap(ConsumerConfig::new(["memory://local"]), vec![backend])?;
//! consumer.handle("orders", "billing", handler_fn(|message: &mut Message| {
//!     Box::pin(async move {
//!         log::info!("order {}", message.id());
//!         Ok(())
//!     })
//! }));
//!
//! consumer.start().await?;
//! consumer.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::broker::ConsumerBackend;
use crate::consumer::config::ConsumerConfig;
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::flow::{FlowController, FlowState};
use crate::consumer::handler::Handler;
use crate::consumer::interceptor::{Interceptor, PipelineBuilder};
use crate::consumer::pool::WorkerPool;
use crate::consumer::BROKER_CONSUMER_RATIO;
use crate::core::shutdown::ShutdownCoordinator;
use crate::telemetry::{FacadeSink, MetricsSink};
use std::collections::HashMap;
use std::sync::Arc;

type BackendMap = HashMap<String, HashMap<String, Arc<dyn ConsumerBackend>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

struct Subscription {
    pool: Arc<WorkerPool>,
    controller: Option<Arc<FlowController>>,
}

/// Registry of subscriptions and their worker pools
pub struct Consumer {
    config: ConsumerConfig,
    backends: BackendMap,
    interceptors: PipelineBuilder,
    subscriptions: Vec<Subscription>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: ShutdownCoordinator,
    lifecycle: Lifecycle,
}

impl Consumer {
    /// Build the registry from broker backends
    ///
    /// Fails if `config` has no lookup address. When two backends claim the
    /// same (topic, channel), the later one wins.
    pub fn wrap(
        config: ConsumerConfig,
        backends: Vec<Arc<dyn ConsumerBackend>>,
    ) -> ConsumerResult<Self> {
        config.validate()?;

        let mut map: BackendMap = HashMap::new();
        for backend in backends {
            let topic = backend.topic().to_string();
            let channel = backend.channel().to_string();
            if map
                .entry(topic.clone())
                .or_default()
                .insert(channel.clone(), backend)
                .is_some()
            {
                log::warn!("Duplicate backend for {}/{}, keeping the last one", topic, channel);
            }
        }

        let (shutdown, _) = ShutdownCoordinator::new();
        Ok(Self {
            config,
            backends: map,
            interceptors: PipelineBuilder::new(),
            subscriptions: Vec::new(),
            metrics: Arc::new(FacadeSink::new()),
            shutdown,
            lifecycle: Lifecycle::Created,
        })
    }

    /// Replace the sink used for the "message retrieved" data point
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Registered backends as topic → channel → true
    pub fn backends(&self) -> HashMap<String, HashMap<String, bool>> {
        self.backends
            .iter()
            .map(|(topic, channels)| {
                (
                    topic.clone(),
                    channels.keys().map(|channel| (channel.clone(), true)).collect(),
                )
            })
            .collect()
    }

    /// Append an interceptor to the chain of subscriptions registered after this call
    ///
    /// Registering the same handle twice is a no-op.
    pub fn use_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) -> &mut Self {
        if !self.interceptors.push(interceptor) {
            log::debug!("Interceptor already registered, skipping");
        }
        self
    }

    pub fn use_interceptors<I>(&mut self, interceptors: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        for interceptor in interceptors {
            self.use_interceptor(interceptor);
        }
        self
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Register a handler for (topic, channel)
    ///
    /// The interceptors registered so far are frozen into the handler chain
    /// now; later `use_interceptor` calls do not affect this subscription.
    /// A missing backend is reported by [`start`](Self::start), not here.
    pub fn handle<H>(&mut self, topic: &str, channel: &str, handler: H) -> Arc<WorkerPool>
    where
        H: Handler + 'static,
    {
        self.handle_arc(topic, channel, Arc::new(handler))
    }

    pub fn handle_arc(
        &mut self,
        topic: &str,
        channel: &str,
        handler: Arc<dyn Handler>,
    ) -> Arc<WorkerPool> {
        let pipeline = self.interceptors.build(handler);
        let (concurrency, buffer_multiplier) = match self.backend(topic, channel) {
            Some(backend) => (
                positive_or(backend.concurrency(), self.config.concurrency),
                positive_or(backend.buffer_multiplier(), self.config.buffer_multiplier),
            ),
            None => (self.config.concurrency, self.config.buffer_multiplier),
        };

        let mut pool = WorkerPool::new(topic, channel, pipeline);
        pool.set_concurrency(concurrency);
        pool.set_buffer_multiplier(buffer_multiplier);
        pool.set_requeue_delay(self.config.requeue_delay());
        let pool = Arc::new(pool);

        if let Some(index) = self
            .subscriptions
            .iter()
            .position(|s| s.pool.topic() == topic && s.pool.channel() == channel)
        {
            log::warn!("Replacing handler for {}/{}", topic, channel);
            self.subscriptions.remove(index);
        }
        log::debug!(
            "Registered handler for {}/{} (concurrency {}, buffer {})",
            topic,
            channel,
            pool.concurrency(),
            pool.buffer_length()
        );
        self.subscriptions.push(Subscription {
            pool: Arc::clone(&pool),
            controller: None,
        });
        pool
    }

    /// Worker pools in registration order
    pub fn pools(&self) -> Vec<Arc<WorkerPool>> {
        self.subscriptions
            .iter()
            .map(|s| Arc::clone(&s.pool))
            .collect()
    }

    pub fn pool(&self, topic: &str, channel: &str) -> Option<Arc<WorkerPool>> {
        self.subscription(topic, channel)
            .map(|s| Arc::clone(&s.pool))
    }

    /// Backpressure state of a started subscription
    pub fn flow_state(&self, topic: &str, channel: &str) -> Option<FlowState> {
        self.subscription(topic, channel)
            .and_then(|s| s.controller.as_ref())
            .map(|controller| controller.state())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Install flow controllers, connect every backend and spawn workers
    ///
    /// Every subscription is checked for a backend before anything is
    /// touched, so a missing backend leaves the registry unstarted. A
    /// connect failure stops whatever was already started.
    pub async fn start(&mut self) -> ConsumerResult<()> {
        match self.lifecycle {
            Lifecycle::Running => return Err(ConsumerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ConsumerError::AlreadyStopped),
            Lifecycle::Created => {}
        }

        let mut bound = Vec::with_capacity(self.subscriptions.len());
        for subscription in &self.subscriptions {
            let (topic, channel) = (subscription.pool.topic(), subscription.pool.channel());
            let backend =
                self.backend(topic, channel)
                    .ok_or_else(|| ConsumerError::TopicChannelNotFound {
                        topic: topic.to_string(),
                        channel: channel.to_string(),
                    })?;
            bound.push(backend);
        }

        self.lifecycle = Lifecycle::Running;
        for (index, backend) in bound.into_iter().enumerate() {
            let pool = Arc::clone(&self.subscriptions[index].pool);
            let controller = Arc::new(FlowController::new(
                Arc::clone(&pool),
                Arc::clone(&backend),
                Arc::clone(&self.metrics),
                self.shutdown.signal(),
                self.config.poll_interval(),
            ));
            self.subscriptions[index].controller = Some(Arc::clone(&controller));

            let readers = pool.concurrency() / BROKER_CONSUMER_RATIO;
            if readers > 1 {
                backend.add_concurrent_handlers(controller, readers);
            } else {
                backend.add_handler(controller);
            }
            backend.change_max_in_flight(pool.buffer_length());

            if let Err(source) = backend.connect_to_lookups(&self.config.lookup_addresses).await {
                let error = ConsumerError::Connect {
                    topic: pool.topic().to_string(),
                    channel: pool.channel().to_string(),
                    source,
                };
                log::error!("{}, rolling back start", error);
                self.shutdown_started().await;
                return Err(error);
            }

            let started = pool.start_workers();
            log::info!(
                "Consuming {}/{} with {} workers (buffer {})",
                pool.topic(),
                pool.channel(),
                started,
                pool.buffer_length()
            );
        }
        Ok(())
    }

    /// Stop every backend, then every worker, then requeue what is left
    ///
    /// Returns once every worker task has exited. Stopping twice is a no-op.
    pub async fn stop(&mut self) -> ConsumerResult<()> {
        match self.lifecycle {
            Lifecycle::Running => {
                self.shutdown_started().await;
                log::info!("Consumer stopped");
            }
            Lifecycle::Created => {
                self.lifecycle = Lifecycle::Stopped;
            }
            Lifecycle::Stopped => {}
        }
        Ok(())
    }

    async fn shutdown_started(&mut self) {
        self.lifecycle = Lifecycle::Stopped;
        // Cancel blocked throttle waits before the backends wait on their readers
        self.shutdown.trigger_shutdown();

        // Every registered backend, including ones no handler was bound to
        for backend in self.backends.values().flat_map(|channels| channels.values()) {
            backend.stop().await;
        }

        for subscription in &self.subscriptions {
            let pool = &subscription.pool;
            for _ in 0..pool.concurrency() {
                pool.stop().await;
            }
            pool.requeue_pending().await;
        }
    }

    fn backend(&self, topic: &str, channel: &str) -> Option<Arc<dyn ConsumerBackend>> {
        self.backends
            .get(topic)
            .and_then(|channels| channels.get(channel))
            .cloned()
    }

    fn subscription(&self, topic: &str, channel: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.pool.topic() == topic && s.pool.channel() == channel)
    }
}

fn positive_or(preferred: i64, fallback: i64) -> i64 {
    if preferred > 0 {
        preferred
    } else {
        fallback
    }
}
