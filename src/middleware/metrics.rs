//! Metrics interceptor

use crate::consumer::{HandlerResult, Interceptor, Message, Next};
use crate::telemetry::{FacadeSink, MetricsSink};
use std::sync::Arc;
use std::time::Instant;

/// Records per-message data points around the rest of the chain
///
/// The result of the chain is returned untouched. Throttle status and buffer
/// depth are read after the chain ran, so they are per-message observations
/// rather than exact pool state: workers finish out of order.
pub struct Metrics {
    sink: Arc<dyn MetricsSink>,
}

impl Metrics {
    /// Emit through the `metrics` crate facade
    pub fn new() -> Self {
        Self::with_sink(Arc::new(FacadeSink::new()))
    }

    pub fn with_sink(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Interceptor for Metrics {
    async fn invoke(&self, message: &mut Message, next: Next<'_>) -> HandlerResult {
        let started = Instant::now();
        let result = next.run(message).await;

        let (topic, channel) = (message.topic.as_str(), message.channel.as_str());
        self.sink.handle_duration(topic, channel, started.elapsed());
        self.sink.handle_count(topic, channel, result.is_err());
        self.sink
            .worker_current(topic, channel, message.info.worker_current);
        self.sink
            .throttle_status(topic, channel, message.info.throttled);
        self.sink
            .message_in_buffer(topic, channel, message.info.message_in_buffer);
        result
    }
}
