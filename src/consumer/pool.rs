//! Worker pool for a single (topic, channel) subscription
//!
//! The pool bounds both memory and parallelism: messages wait in a queue of
//! `concurrency * buffer_multiplier` slots and at most `concurrency` worker
//! tasks drain it. Each worker runs the composed [`Pipeline`] synchronously
//! and then responds to the broker with the handler's outcome.
//!
//! The throttle flag and the worker count are the only mutable shared state
//! and live together under one lock.

use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::handler::HandlerResult;
use crate::consumer::interceptor::Pipeline;
use crate::consumer::message::Message;
use crate::consumer::DEFAULT_BUFFER_MULTIPLIER;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Clamp a configured concurrency; non-positive means 1
pub fn normalize_concurrency(concurrency: i64) -> usize {
    if concurrency <= 0 {
        1
    } else {
        concurrency as usize
    }
}

/// Clamp a configured buffer multiplier; non-positive means the default
pub fn normalize_buffer_multiplier(buffer_multiplier: i64) -> usize {
    if buffer_multiplier <= 0 {
        DEFAULT_BUFFER_MULTIPLIER
    } else {
        buffer_multiplier as usize
    }
}

struct WorkerSlot {
    ordinal: usize,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    throttle: bool,
    worker_number: usize,
    next_ordinal: usize,
    workers: Vec<WorkerSlot>,
}

/// Handling outcome counters for a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub handled: u64,
    pub failed: u64,
    pub requeued_on_stop: u64,
}

type SharedQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>;

/// Bounded queue plus a capped set of worker tasks
pub struct WorkerPool {
    topic: String,
    channel: String,
    concurrency: usize,
    buffer_multiplier: usize,
    buffer_length: usize,
    requeue_delay: Duration,
    sender: mpsc::Sender<Message>,
    receiver: SharedQueue,
    pipeline: Pipeline,
    state: Mutex<PoolState>,
    dequeued: Notify,
    handled: AtomicU64,
    failed: AtomicU64,
    requeued_on_stop: AtomicU64,
}

impl WorkerPool {
    /// Create a pool with concurrency 1 and the default buffer multiplier
    pub fn new(topic: impl Into<String>, channel: impl Into<String>, pipeline: Pipeline) -> Self {
        let buffer_length = DEFAULT_BUFFER_MULTIPLIER;
        let (sender, receiver) = mpsc::channel(buffer_length);
        Self {
            topic: topic.into(),
            channel: channel.into(),
            concurrency: 1,
            buffer_multiplier: DEFAULT_BUFFER_MULTIPLIER,
            buffer_length,
            requeue_delay: Duration::ZERO,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            pipeline,
            state: Mutex::new(PoolState::default()),
            dequeued: Notify::new(),
            handled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            requeued_on_stop: AtomicU64::new(0),
        }
    }

    /// Set the worker count, non-positive meaning 1, and resize the queue
    ///
    /// Takes `&mut self`, so it can only run before the pool is shared and started.
    pub fn set_concurrency(&mut self, concurrency: i64) {
        self.concurrency = normalize_concurrency(concurrency);
        self.resize_queue();
    }

    /// Set the queue slots per worker, non-positive meaning the default, and resize the queue
    pub fn set_buffer_multiplier(&mut self, buffer_multiplier: i64) {
        self.buffer_multiplier = normalize_buffer_multiplier(buffer_multiplier);
        self.resize_queue();
    }

    /// Delay used when the worker requeues a failed message
    pub fn set_requeue_delay(&mut self, delay: Duration) {
        self.requeue_delay = delay;
    }

    fn resize_queue(&mut self) {
        self.buffer_length = self.concurrency * self.buffer_multiplier;
        let (sender, receiver) = mpsc::channel(self.buffer_length);
        self.sender = sender;
        self.receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn buffer_multiplier(&self) -> usize {
        self.buffer_multiplier
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }

    /// Messages currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Number of running worker tasks
    pub fn worker_number(&self) -> usize {
        self.state.lock().unwrap().worker_number
    }

    pub fn is_throttled(&self) -> bool {
        self.state.lock().unwrap().throttle
    }

    pub fn set_throttle(&self, throttle: bool) {
        self.state.lock().unwrap().throttle = throttle;
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            handled: self.handled.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            requeued_on_stop: self.requeued_on_stop.load(Ordering::Acquire),
        }
    }

    /// Signalled every time a worker takes a message off the queue
    pub(crate) fn dequeued(&self) -> &Notify {
        &self.dequeued
    }

    /// Wait for a free queue slot
    pub async fn reserve(&self) -> ConsumerResult<mpsc::Permit<'_, Message>> {
        self.sender
            .reserve()
            .await
            .map_err(|_| ConsumerError::PoolClosed {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
            })
    }

    /// Queue a message, waiting while the queue is full
    pub async fn push(&self, message: Message) -> ConsumerResult<()> {
        self.reserve().await?.send(message);
        Ok(())
    }

    /// Spawn one worker task unless `concurrency` workers are already running
    ///
    /// Returns true if a worker was spawned.
    pub fn spawn_worker(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.worker_number >= self.concurrency {
            log::debug!(
                "Pool {}/{} already runs {} workers",
                self.topic,
                self.channel,
                state.worker_number
            );
            return false;
        }
        state.worker_number += 1;
        state.next_ordinal += 1;
        let ordinal = state.next_ordinal;

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(self).work(ordinal, stop_rx));
        state.workers.push(WorkerSlot {
            ordinal,
            stop: stop_tx,
            handle,
        });
        true
    }

    /// Spawn workers up to `concurrency`, returning how many were started
    pub fn start_workers(self: &Arc<Self>) -> usize {
        let mut started = 0;
        while self.spawn_worker() {
            started += 1;
        }
        log::debug!(
            "Pool {}/{} started {} workers (buffer {})",
            self.topic,
            self.channel,
            started,
            self.buffer_length
        );
        started
    }

    /// Stop one worker and wait for it to exit
    ///
    /// Each call consumes exactly one running worker. With no worker running
    /// it returns immediately; calling it more times than there are workers
    /// is a caller error that has no effect.
    pub async fn stop(&self) {
        let slot = {
            let mut state = self.state.lock().unwrap();
            let slot = state.workers.pop();
            if slot.is_some() {
                state.worker_number -= 1;
            }
            slot
        };

        let Some(slot) = slot else {
            log::debug!(
                "Pool {}/{} stop requested with no running workers",
                self.topic,
                self.channel
            );
            return;
        };

        // A worker that already exited has dropped its receiver; nothing to signal
        let _ = slot.stop.send(());
        if let Err(e) = slot.handle.await {
            log::warn!(
                "Worker {} of {}/{} ended abnormally: {}",
                slot.ordinal,
                self.topic,
                self.channel,
                e
            );
        }
    }

    /// Return queued messages to the broker once every worker has exited
    pub async fn requeue_pending(&self) -> usize {
        if self.worker_number() > 0 {
            return 0;
        }
        let mut receiver = self.receiver.lock().await;
        let mut requeued = 0;
        while let Ok(message) = receiver.try_recv() {
            if message.requeue_without_backoff(Duration::ZERO) {
                requeued += 1;
            }
        }
        if requeued > 0 {
            self.requeued_on_stop
                .fetch_add(requeued as u64, Ordering::AcqRel);
            log::info!(
                "Pool {}/{} returned {} unprocessed messages to the broker",
                self.topic,
                self.channel,
                requeued
            );
        }
        requeued
    }

    async fn work(self: Arc<Self>, ordinal: usize, mut stop: oneshot::Receiver<()>) {
        log::trace!("Worker {} of {}/{} started", ordinal, self.topic, self.channel);
        loop {
            let message = tokio::select! {
                biased;
                _ = &mut stop => break,
                message = self.next_message() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.process(ordinal, message).await;
        }
        log::trace!("Worker {} of {}/{} exited", ordinal, self.topic, self.channel);
    }

    async fn next_message(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    async fn process(&self, ordinal: usize, mut message: Message) {
        message.info.worker_total = self.concurrency;
        message.info.worker_current = ordinal;
        message.info.message_in_buffer = self.queue_depth();
        if self.is_throttled() {
            message.info.throttle_flag = true;
        }
        self.dequeued.notify_waiters();

        // A panicking handler must not take the worker down with it
        let result = AssertUnwindSafe(self.pipeline.dispatch(&mut message))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let reason = panic_reason(payload.as_ref());
                log::error!(
                    "Handler for {}/{} panicked on message {}: {}",
                    self.topic,
                    self.channel,
                    message.id(),
                    reason
                );
                Err(format!("handler panicked: {}", reason).into())
            });
        self.respond(&message, result);
    }

    /// Report the handler outcome to the broker unless the handler already did
    fn respond(&self, message: &Message, result: HandlerResult) {
        match result {
            Ok(()) => {
                self.handled.fetch_add(1, Ordering::AcqRel);
                if !message.has_responded() {
                    message.finish();
                }
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::AcqRel);
                log::warn!(
                    "Handler for {}/{} failed on message {} (attempt {}): {}",
                    self.topic,
                    self.channel,
                    message.id(),
                    message.attempts(),
                    e
                );
                if !message.has_responded() {
                    message.requeue(self.requeue_delay);
                }
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason
    } else {
        "non-string panic payload"
    }
}
