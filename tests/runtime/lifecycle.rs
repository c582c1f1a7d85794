//! Lifecycle and error propagation tests

use crate::common::{as_backend, consumer_config, memory_consumer, wait_until};
use msgflow::broker::memory::MemoryLookup;
use msgflow::consumer::{handler_fn, Consumer, ConsumerError, Message};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn noop() -> impl msgflow::consumer::Handler {
    handler_fn(|_message: &mut Message| Box::pin(async { Ok(()) }))
}

#[tokio::test]
async fn test_start_and_stop_manage_workers() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 3, 2);
    let images = memory_consumer(&lookup, "images", "resize", 2, 2);

    let mut consumer =
        Consumer::wrap(consumer_config(), vec![as_backend(&orders), as_backend(&images)]).unwrap();
    let orders_pool = consumer.handle("orders", "billing", noop());
    let images_pool = consumer.handle("images", "resize", noop());

    consumer.start().await.unwrap();
    assert!(consumer.is_running());
    assert_eq!(orders_pool.worker_number(), 3);
    assert_eq!(images_pool.worker_number(), 2);
    assert!(orders.is_connected() && images.is_connected());

    consumer.stop().await.unwrap();
    assert!(!consumer.is_running());
    assert_eq!(orders_pool.worker_number(), 0);
    assert_eq!(images_pool.worker_number(), 0);
    assert!(!orders.is_connected());
}

#[tokio::test]
async fn test_missing_backend_reported_at_start() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 1, 1);

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&orders)]).unwrap();
    consumer.handle("orders", "billing", noop());
    consumer.handle("payments", "billing", noop());

    let error = consumer.start().await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Backend with topic 'payments' and channel 'billing' not found"
    );
    assert!(!orders.is_connected(), "no backend connects on a failed start");
}

#[tokio::test]
#[serial]
async fn test_handler_error_is_requeued_and_redelivered() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 1, 4);
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&orders)]).unwrap();
    let recorded = attempts.clone();
    let pool = consumer.handle(
        "orders",
        "billing",
        handler_fn(move |message: &mut Message| {
            let recorded = recorded.clone();
            Box::pin(async move {
                recorded.lock().unwrap().push(message.attempts());
                if message.attempts() == 1 {
                    return Err("downstream timeout".into());
                }
                Ok(())
            })
        }),
    );
    consumer.start().await.unwrap();

    lookup.publish("orders", b"{}".to_vec()).await.unwrap();
    wait_until("redelivered message finished", || orders.ack_stats().finished == 1).await;

    assert_eq!(*attempts.lock().unwrap(), vec![1, 2]);
    assert_eq!(orders.ack_stats().requeued, 1);
    assert_eq!(pool.stats().failed, 1);
    assert_eq!(pool.stats().handled, 1);
    consumer.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_stop_returns_queued_messages_to_broker() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 1, 10);

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&orders)]).unwrap();
    let pool = consumer.handle(
        "orders",
        "billing",
        handler_fn(|_message: &mut Message| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
        }),
    );
    consumer.start().await.unwrap();

    for sequence in 0..5u8 {
        lookup.publish("orders", vec![sequence]).await.unwrap();
    }
    wait_until("queue filled", || pool.queue_depth() == 4).await;

    consumer.stop().await.unwrap();

    assert_eq!(orders.ack_stats().finished, 1, "the message in progress completes");
    assert_eq!(pool.stats().requeued_on_stop, 4);
    assert_eq!(lookup.backlog_len("orders", "billing"), 4);
}

#[tokio::test]
async fn test_restart_after_stop_is_rejected() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 1, 1);

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&orders)]).unwrap();
    consumer.handle("orders", "billing", noop());
    consumer.start().await.unwrap();
    consumer.stop().await.unwrap();

    assert!(matches!(consumer.start().await, Err(ConsumerError::AlreadyStopped)));
}
