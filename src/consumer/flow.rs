//! Backpressure controller
//!
//! The [`FlowController`] is the [`DeliveryHandler`] the broker client calls
//! for every delivered message. It admits the message into the worker pool
//! queue, and when the queue is more than half full it pauses upstream
//! delivery until workers have drained it below half again.
//!
//! ```text
//!            depth > half                        depth < half
//! Admitting ─────────────▶ Throttled ──(drain wait)──────────▶ Draining ──▶ Admitting
//!            throttle=true                         max-in-flight=buffer
//!            max-in-flight=0                       throttle=false
//! ```
//!
//! The broker callback does not return while the controller waits, which is
//! what holds the broker back. Messages already queued keep draining.

use crate::broker::{BrokerResult, ConsumerBackend, Delivery, DeliveryHandler};
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::message::Message;
use crate::consumer::pool::WorkerPool;
use crate::core::shutdown::ShutdownSignal;
use crate::telemetry::MetricsSink;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Admission state of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Broker delivers at full max-in-flight
    Admitting,
    /// Broker paused, waiting for the queue to drain
    Throttled,
    /// Queue drained, delivery being resumed
    Draining,
}

pub struct FlowController {
    pool: Arc<WorkerPool>,
    backend: Arc<dyn ConsumerBackend>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: ShutdownSignal,
    poll_interval: Duration,
    state: Mutex<FlowState>,
}

impl FlowController {
    pub fn new(
        pool: Arc<WorkerPool>,
        backend: Arc<dyn ConsumerBackend>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: ShutdownSignal,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            backend,
            metrics,
            shutdown,
            poll_interval,
            state: Mutex::new(FlowState::Admitting),
        }
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock().unwrap()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Queue depth above which delivery is paused
    fn high_water_mark(&self) -> usize {
        self.pool.buffer_length() / 2
    }

    /// Queue depth below which delivery resumes
    ///
    /// Never 0, otherwise a single-slot buffer could never resume.
    fn low_water_mark(&self) -> usize {
        self.high_water_mark().max(1)
    }

    /// Admit one delivery: throttle if needed, then queue it
    pub async fn admit(&self, delivery: Delivery) -> ConsumerResult<()> {
        if self.pool.queue_depth() > self.high_water_mark() {
            self.throttle();
            if let Err(e) = self.wait_for_drain().await {
                delivery.requeue_without_backoff(Duration::ZERO);
                return Err(e);
            }
            self.resume();
        }

        // A free slot wins over a concurrent shutdown; stop requeues it anyway
        let permit = tokio::select! {
            biased;
            permit = self.pool.reserve() => permit,
            _ = self.shutdown.cancelled() => Err(ConsumerError::ShuttingDown),
        };
        match permit {
            Ok(permit) => {
                permit.send(Message::new(
                    self.pool.topic(),
                    self.pool.channel(),
                    delivery,
                ));
                Ok(())
            }
            Err(e) => {
                delivery.requeue_without_backoff(Duration::ZERO);
                Err(e)
            }
        }
    }

    /// Admitting → Throttled: flag the pool first, then pause the broker
    ///
    /// The state lock is held for the whole transition, as in [`resume`](Self::resume),
    /// so no reader can observe a half-finished transition.
    fn throttle(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == FlowState::Throttled {
            return;
        }
        *state = FlowState::Throttled;
        self.pool.set_throttle(true);
        self.backend.change_max_in_flight(0);
        log::warn!(
            "Throttling {}/{}: {} of {} buffer slots in use, delivery paused",
            self.pool.topic(),
            self.pool.channel(),
            self.pool.queue_depth(),
            self.pool.buffer_length()
        );
    }

    /// Throttled → Draining → Admitting: resume the broker, then clear the flag
    ///
    /// Runs entirely under the state lock. A reader that finds the queue above
    /// the high-water mark right after this returns pauses the broker again.
    fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != FlowState::Throttled {
            return;
        }
        *state = FlowState::Draining;
        self.backend.change_max_in_flight(self.pool.buffer_length());
        self.pool.set_throttle(false);
        *state = FlowState::Admitting;
        log::info!(
            "Resumed {}/{}: buffer drained to {}",
            self.pool.topic(),
            self.pool.channel(),
            self.pool.queue_depth()
        );
    }

    /// Wait until the queue depth is below the low-water mark
    ///
    /// Woken by every worker dequeue, with the poll interval as a fallback.
    async fn wait_for_drain(&self) -> ConsumerResult<()> {
        let low_water_mark = self.low_water_mark();
        loop {
            let dequeued = self.pool.dequeued().notified();
            tokio::pin!(dequeued);
            dequeued.as_mut().enable();

            if self.pool.queue_depth() < low_water_mark {
                return Ok(());
            }
            if self.shutdown.is_shutdown_requested() {
                return Err(ConsumerError::ShuttingDown);
            }

            tokio::select! {
                _ = &mut dequeued => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => return Err(ConsumerError::ShuttingDown),
            }
        }
    }
}

#[async_trait::async_trait]
impl DeliveryHandler for FlowController {
    async fn handle_delivery(&self, delivery: Delivery) -> BrokerResult<()> {
        self.metrics
            .message_retrieved(self.pool.topic(), self.pool.channel());
        self.admit(delivery).await.map_err(Into::into)
    }
}
