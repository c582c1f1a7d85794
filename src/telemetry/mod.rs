//! Telemetry
//!
//! The consumer runtime reports its data points through [`MetricsSink`].
//! [`FacadeSink`] forwards them to whatever recorder is installed for the
//! `metrics` crate (Prometheus exporter, statsd, ...). [`RecordingSink`]
//! keeps them in memory for tests and the `simulate` summary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::collections::HashMap;
use std::sync::{Mutex, Once};
use std::time::Duration;

/// A metric name with its help text
pub struct Metric {
    pub name: &'static str,
    pub description: &'static str,
}

pub const MESSAGE_RETRIEVED_TOTAL: Metric = Metric {
    name: "msgflow_message_retrieved_total",
    description: "Messages delivered by the broker to a subscription",
};

pub const HANDLE_TOTAL: Metric = Metric {
    name: "msgflow_handle_total",
    description: "Handled messages, labelled by whether the handler returned an error",
};

pub const HANDLE_DURATION_MS: Metric = Metric {
    name: "msgflow_message_handle_duration_ms",
    description: "Time spent in the handler chain per message, in milliseconds",
};

pub const WORKER_COUNT_CURRENT: Metric = Metric {
    name: "msgflow_worker_count_current",
    description: "Ordinal of the worker that handled the latest message",
};

pub const THROTTLE_STATUS: Metric = Metric {
    name: "msgflow_throttle_status",
    description: "1 while the subscription was throttled for the latest message",
};

pub const MESSAGE_IN_BUFFER: Metric = Metric {
    name: "msgflow_message_in_buffer",
    description: "Queue depth observed when the latest message was handed to a worker",
};

/// Destination for consumer runtime data points
///
/// Every data point is keyed by (topic, channel).
pub trait MetricsSink: Send + Sync {
    fn message_retrieved(&self, topic: &str, channel: &str);
    fn handle_duration(&self, topic: &str, channel: &str, elapsed: Duration);
    fn handle_count(&self, topic: &str, channel: &str, error: bool);
    fn worker_current(&self, topic: &str, channel: &str, worker: usize);
    fn throttle_status(&self, topic: &str, channel: &str, throttled: bool);
    fn message_in_buffer(&self, topic: &str, channel: &str, depth: usize);
}

static DESCRIBE: Once = Once::new();

/// [`MetricsSink`] emitting through the `metrics` crate macros
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl FacadeSink {
    pub fn new() -> Self {
        DESCRIBE.call_once(|| {
            describe_counter!(MESSAGE_RETRIEVED_TOTAL.name, MESSAGE_RETRIEVED_TOTAL.description);
            describe_counter!(HANDLE_TOTAL.name, HANDLE_TOTAL.description);
            describe_histogram!(HANDLE_DURATION_MS.name, HANDLE_DURATION_MS.description);
            describe_gauge!(WORKER_COUNT_CURRENT.name, WORKER_COUNT_CURRENT.description);
            describe_gauge!(THROTTLE_STATUS.name, THROTTLE_STATUS.description);
            describe_gauge!(MESSAGE_IN_BUFFER.name, MESSAGE_IN_BUFFER.description);
        });
        Self
    }
}

impl MetricsSink for FacadeSink {
    fn message_retrieved(&self, topic: &str, channel: &str) {
        counter!(
            MESSAGE_RETRIEVED_TOTAL.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string()
        )
        .increment(1);
    }

    fn handle_duration(&self, topic: &str, channel: &str, elapsed: Duration) {
        histogram!(
            HANDLE_DURATION_MS.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string()
        )
        .record(elapsed.as_secs_f64() * 1000.0);
    }

    fn handle_count(&self, topic: &str, channel: &str, error: bool) {
        counter!(
            HANDLE_TOTAL.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string(),
            "error" => error.to_string()
        )
        .increment(1);
    }

    fn worker_current(&self, topic: &str, channel: &str, worker: usize) {
        gauge!(
            WORKER_COUNT_CURRENT.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string()
        )
        .set(worker as f64);
    }

    fn throttle_status(&self, topic: &str, channel: &str, throttled: bool) {
        gauge!(
            THROTTLE_STATUS.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string()
        )
        .set(if throttled { 1.0 } else { 0.0 });
    }

    fn message_in_buffer(&self, topic: &str, channel: &str, depth: usize) {
        gauge!(
            MESSAGE_IN_BUFFER.name,
            "topic" => topic.to_string(),
            "channel" => channel.to_string()
        )
        .set(depth as f64);
    }
}

/// Data points recorded for one (topic, channel)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionSamples {
    pub retrieved: u64,
    pub handled_ok: u64,
    pub handled_err: u64,
    pub durations: Vec<Duration>,
    pub last_worker: usize,
    /// Every throttle status reported, in order
    pub throttle_statuses: Vec<bool>,
    pub max_in_buffer: usize,
}

impl SubscriptionSamples {
    pub fn throttled_count(&self) -> usize {
        self.throttle_statuses.iter().filter(|t| **t).count()
    }
}

/// [`MetricsSink`] keeping every data point in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    samples: Mutex<HashMap<(String, String), SubscriptionSamples>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the samples for (topic, channel); empty if nothing was recorded
    pub fn samples(&self, topic: &str, channel: &str) -> SubscriptionSamples {
        self.samples
            .lock()
            .unwrap()
            .get(&(topic.to_string(), channel.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every recorded subscription, sorted by (topic, channel)
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.samples.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn update<F>(&self, topic: &str, channel: &str, f: F)
    where
        F: FnOnce(&mut SubscriptionSamples),
    {
        let mut samples = self.samples.lock().unwrap();
        f(samples
            .entry((topic.to_string(), channel.to_string()))
            .or_default());
    }
}

impl MetricsSink for RecordingSink {
    fn message_retrieved(&self, topic: &str, channel: &str) {
        self.update(topic, channel, |s| s.retrieved += 1);
    }

    fn handle_duration(&self, topic: &str, channel: &str, elapsed: Duration) {
        self.update(topic, channel, |s| s.durations.push(elapsed));
    }

    fn handle_count(&self, topic: &str, channel: &str, error: bool) {
        self.update(topic, channel, |s| {
            if error {
                s.handled_err += 1;
            } else {
                s.handled_ok += 1;
            }
        });
    }

    fn worker_current(&self, topic: &str, channel: &str, worker: usize) {
        self.update(topic, channel, |s| s.last_worker = worker);
    }

    fn throttle_status(&self, topic: &str, channel: &str, throttled: bool) {
        self.update(topic, channel, |s| s.throttle_statuses.push(throttled));
    }

    fn message_in_buffer(&self, topic: &str, channel: &str, depth: usize) {
        self.update(topic, channel, |s| s.max_in_buffer = s.max_in_buffer.max(depth));
    }
}
