//! Producer allow-list against the in-process broker

use crate::common::{as_backend, consumer_config, memory_consumer, wait_until};
use msgflow::broker::memory::{MemoryLookup, MemoryProducer};
use msgflow::consumer::{handler_fn, Consumer, Message};
use msgflow::producer::{Producer, ProducerError};
use std::sync::Arc;

#[tokio::test]
async fn test_only_declared_topics_are_published() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 1, 4);
    let payments = memory_consumer(&lookup, "payments", "ledger", 1, 4);

    let mut consumer =
        Consumer::wrap(consumer_config(), vec![as_backend(&orders), as_backend(&payments)])
            .unwrap();
    for (topic, channel) in [("orders", "billing"), ("payments", "ledger")] {
        consumer.handle(
            topic,
            channel,
            handler_fn(|_message: &mut Message| Box::pin(async { Ok(()) })),
        );
    }
    consumer.start().await.unwrap();

    let producer = Producer::wrap(Arc::new(MemoryProducer::new(lookup.clone())), ["orders"]);
    producer
        .multi_publish("orders", vec![b"1".to_vec(), b"2".to_vec()])
        .await
        .unwrap();
    let rejected = producer.publish("payments", b"3".to_vec()).await;
    assert!(matches!(rejected, Err(ProducerError::TopicNotAllowed { .. })));

    wait_until("orders finished", || orders.ack_stats().finished == 2).await;
    assert_eq!(payments.ack_stats().finished, 0);

    producer.stop().await;
    assert!(producer.publish("orders", b"late".to_vec()).await.is_err());
    consumer.stop().await.unwrap();
}
