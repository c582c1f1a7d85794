//! Backpressure tests
//!
//! Deliveries pile up behind a slow handler until the queue passes half its
//! capacity, at which point the broker is paused and later reopened.

use crate::common::{as_backend, consumer_config, memory_consumer, wait_until};
use msgflow::broker::memory::{MemoryLookup, MemoryProducer};
use msgflow::consumer::{handler_fn, Consumer, FlowState, Message};
use msgflow::middleware::{Metrics, Throttle};
use msgflow::producer::Producer;
use msgflow::telemetry::RecordingSink;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "orders";
const CHANNEL: &str = "billing";

#[tokio::test]
#[serial]
async fn test_slow_handler_pauses_and_resumes_broker() {
    let lookup = MemoryLookup::new();
    let backend = memory_consumer(&lookup, TOPIC, CHANNEL, 1, 10);
    let sink = Arc::new(RecordingSink::new());

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&backend)])
        .unwrap()
        .with_metrics_sink(sink.clone());
    consumer
        .use_interceptor(Arc::new(Metrics::with_sink(sink.clone())))
        .use_interceptor(Arc::new(Throttle::new(Duration::from_millis(5))));
    let pool = consumer.handle(
        TOPIC,
        CHANNEL,
        handler_fn(|message: &mut Message| {
            Box::pin(async move {
                if message.id() == 1 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(())
            })
        }),
    );
    assert_eq!(pool.buffer_length(), 10);
    consumer.start().await.unwrap();

    let producer = Producer::wrap(Arc::new(MemoryProducer::new(lookup.clone())), [TOPIC]);
    let publisher = tokio::spawn(async move {
        for sequence in 0..8u8 {
            producer.publish(TOPIC, vec![sequence]).await.unwrap();
        }
    });

    wait_until("all messages finished", || backend.ack_stats().finished == 8).await;
    publisher.await.unwrap();

    assert_eq!(backend.pause_count(), 1, "broker paused exactly once");
    assert_eq!(backend.max_in_flight_history(), vec![10, 0, 10]);
    assert_eq!(consumer.flow_state(TOPIC, CHANNEL), Some(FlowState::Admitting));

    let samples = sink.samples(TOPIC, CHANNEL);
    assert_eq!(samples.retrieved, 8);
    assert_eq!(samples.handled_ok, 8);
    assert!(
        samples.throttled_count() >= 1,
        "messages handed off while paused are slowed down"
    );
    assert!(samples.max_in_buffer <= pool.buffer_length());

    consumer.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_fast_handler_never_pauses() {
    let lookup = MemoryLookup::new();
    let backend = memory_consumer(&lookup, TOPIC, CHANNEL, 4, 10);

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&backend)]).unwrap();
    consumer.handle(
        TOPIC,
        CHANNEL,
        handler_fn(|_message: &mut Message| Box::pin(async { Ok(()) })),
    );
    consumer.start().await.unwrap();

    let producer = MemoryProducer::new(lookup.clone());
    for sequence in 0..20u8 {
        msgflow::broker::ProducerBackend::publish(&producer, TOPIC, vec![sequence])
            .await
            .unwrap();
    }
    wait_until("all messages finished", || backend.ack_stats().finished == 20).await;

    assert_eq!(backend.pause_count(), 0);
    assert_eq!(backend.max_in_flight_history(), vec![40]);
    consumer.stop().await.unwrap();
}
