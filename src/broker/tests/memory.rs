//! Tests for the in-process broker

#[cfg(test)]
mod tests {
    use crate::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup, MemoryProducer};
    use crate::broker::{
        BrokerError, BrokerResult, ConsumerBackend, Delivery, DeliveryHandler, MessageId,
        ProducerBackend,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    /// Records (id, attempts, body) and requeues until `finish_at` attempts
    struct Scripted {
        seen: Mutex<Vec<(MessageId, u16, Vec<u8>)>>,
        finish_at: u16,
    }

    impl Scripted {
        fn finishing() -> Arc<Self> {
            Self::finishing_at(1)
        }

        fn finishing_at(finish_at: u16) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                finish_at,
            })
        }

        fn seen(&self) -> Vec<(MessageId, u16, Vec<u8>)> {
            self.seen.lock().unwrap().clone()
        }

        fn attempts(&self) -> Vec<u16> {
            self.seen().iter().map(|(_, attempts, _)| *attempts).collect()
        }
    }

    #[async_trait::async_trait]
    impl DeliveryHandler for Scripted {
        async fn handle_delivery(&self, delivery: Delivery) -> BrokerResult<()> {
            self.seen
                .lock()
                .unwrap()
                .push((delivery.id(), delivery.attempts(), delivery.body().to_vec()));
            if delivery.attempts() >= self.finish_at {
                delivery.finish();
            } else {
                delivery.requeue(Duration::ZERO);
            }
            Ok(())
        }
    }

    fn addresses() -> Vec<String> {
        vec!["memory://local".to_string()]
    }

    fn consumer(lookup: &Arc<MemoryLookup>, channel: &str) -> MemoryConsumer {
        MemoryConsumer::new(lookup.clone(), MemoryConsumerConfig::new("orders", channel))
            .expect("valid config")
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_config_validation() {
        let lookup = MemoryLookup::new();
        let result = MemoryConsumer::new(lookup.clone(), MemoryConsumerConfig::new("", "billing"));
        assert!(matches!(result, Err(BrokerError::InvalidConfig { .. })));
        let result = MemoryConsumer::new(lookup.clone(), MemoryConsumerConfig::new("orders", ""));
        assert!(matches!(result, Err(BrokerError::InvalidConfig { .. })));

        let consumer = MemoryConsumer::new(
            lookup,
            MemoryConsumerConfig::new("orders", "billing")
                .with_concurrency(-3)
                .with_buffer_multiplier(0),
        )
        .unwrap();
        assert_eq!(consumer.concurrency(), 1);
        assert_eq!(
            consumer.buffer_multiplier(),
            crate::consumer::DEFAULT_BUFFER_MULTIPLIER as i64
        );
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_every_channel() {
        let lookup = MemoryLookup::new();
        let billing = consumer(&lookup, "billing");
        let audit = consumer(&lookup, "audit");
        let billing_handler = Scripted::finishing();
        let audit_handler = Scripted::finishing();
        billing.add_handler(billing_handler.clone());
        audit.add_handler(audit_handler.clone());
        billing.connect_to_lookups(&addresses()).await.unwrap();
        audit.connect_to_lookups(&addresses()).await.unwrap();

        let routed = lookup.publish("orders", b"{\"id\":1}".to_vec()).await.unwrap();
        assert_eq!(routed, 2);
        assert_eq!(lookup.channels("orders"), vec!["audit".to_string(), "billing".to_string()]);

        wait_for(|| billing.ack_stats().finished == 1 && audit.ack_stats().finished == 1).await;
        assert_eq!(billing_handler.seen(), audit_handler.seen(), "same id and body per channel");

        billing.stop().await;
        audit.stop().await;
    }

    #[tokio::test]
    async fn test_topic_without_channels_drops_message() {
        let lookup = MemoryLookup::new();
        assert_eq!(lookup.publish("nobody", b"x".to_vec()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backlog_flushes_on_connect() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing();
        consumer.add_handler(handler.clone());

        for index in 0..3u8 {
            lookup.publish("orders", vec![index]).await.unwrap();
        }
        assert_eq!(lookup.backlog_len("orders", "billing"), 3);
        assert!(handler.seen().is_empty());

        consumer.connect_to_lookups(&addresses()).await.unwrap();
        assert!(consumer.is_connected());
        wait_for(|| consumer.ack_stats().finished == 3).await;
        assert_eq!(lookup.backlog_len("orders", "billing"), 0);

        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_requeue_redelivers_with_next_attempt() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing_at(2);
        consumer.add_handler(handler.clone());
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        lookup.publish("orders", b"retry me".to_vec()).await.unwrap();
        wait_for(|| consumer.ack_stats().finished == 1).await;

        assert_eq!(handler.attempts(), vec![1, 2]);
        let stats = consumer.ack_stats();
        assert_eq!((stats.requeued, stats.dropped), (1, 0));
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_requeue_at_max_attempts_drops() {
        let lookup = MemoryLookup::with_max_attempts(2);
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing_at(u16::MAX);
        consumer.add_handler(handler.clone());
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        lookup.publish("orders", b"poison".to_vec()).await.unwrap();
        wait_for(|| consumer.ack_stats().dropped == 1).await;

        assert_eq!(handler.attempts(), vec![1, 2]);
        assert_eq!(consumer.ack_stats().finished, 0);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_zero_max_in_flight_pauses_readers() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing();
        consumer.add_handler(handler.clone());
        consumer.change_max_in_flight(0);
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        lookup.publish("orders", b"held".to_vec()).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(handler.seen().is_empty(), "paused readers must not pull");

        consumer.change_max_in_flight(5);
        wait_for(|| consumer.ack_stats().finished == 1).await;
        assert_eq!(consumer.max_in_flight(), 5);
        assert_eq!(consumer.max_in_flight_history(), vec![0, 5]);
        assert_eq!(consumer.pause_count(), 1);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_restores_buffered_deliveries() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        consumer.add_handler(Scripted::finishing());
        consumer.change_max_in_flight(0);
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        lookup.publish("orders", b"buffered".to_vec()).await.unwrap();
        consumer.stop().await;

        assert!(!consumer.is_connected());
        assert_eq!(lookup.backlog_len("orders", "billing"), 1);
        assert!(matches!(
            consumer.connect_to_lookups(&addresses()).await,
            Err(BrokerError::Stopped)
        ));

        // A new consumer on the same channel picks the message up
        let replacement = self::consumer(&lookup, "billing");
        let handler = Scripted::finishing();
        replacement.add_handler(handler.clone());
        replacement.connect_to_lookups(&addresses()).await.unwrap();
        wait_for(|| handler.seen().len() == 1).await;
        assert_eq!(handler.seen()[0].2, b"buffered".to_vec());
        replacement.stop().await;
    }

    #[tokio::test]
    async fn test_connect_requires_handlers() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        assert!(matches!(
            consumer.connect_to_lookups(&addresses()).await,
            Err(BrokerError::NoHandlers { .. })
        ));
        assert!(!consumer.is_connected());
    }

    #[tokio::test]
    async fn test_concurrent_handlers_spawn_readers() {
        let lookup = MemoryLookup::new();
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing();
        consumer.add_concurrent_handlers(handler.clone(), 3);
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        for index in 0..6u8 {
            lookup.publish("orders", vec![index]).await.unwrap();
        }
        wait_for(|| consumer.ack_stats().finished == 6).await;
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_producer_rejects_after_stop() {
        let lookup = MemoryLookup::new();
        let producer = MemoryProducer::new(lookup.clone());
        let consumer = consumer(&lookup, "billing");
        let handler = Scripted::finishing();
        consumer.add_handler(handler.clone());
        consumer.connect_to_lookups(&addresses()).await.unwrap();

        producer.ping().await.unwrap();
        producer
            .multi_publish("orders", vec![b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();
        wait_for(|| consumer.ack_stats().finished == 2).await;

        producer.stop().await;
        assert!(matches!(producer.ping().await, Err(BrokerError::Stopped)));
        assert!(matches!(
            producer.publish("orders", b"late".to_vec()).await,
            Err(BrokerError::Stopped)
        ));
        consumer.stop().await;
    }
}
