//! Interceptor ordering across broker delivery, flow control and workers

use crate::common::{as_backend, consumer_config, memory_consumer, wait_until};
use msgflow::broker::memory::MemoryLookup;
use msgflow::consumer::{handler_fn, Consumer, HandlerResult, Interceptor, Message, Next};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Trail(Vec<&'static str>);

struct Mark(&'static str);

#[async_trait::async_trait]
impl Interceptor for Mark {
    async fn invoke(&self, message: &mut Message, next: Next<'_>) -> HandlerResult {
        let mut trail = message.extensions_mut().remove::<Trail>().unwrap_or_default();
        trail.0.push(self.0);
        message.extensions_mut().insert(trail);
        next.run(message).await
    }
}

#[tokio::test]
async fn test_interceptors_run_in_registration_order() {
    let lookup = MemoryLookup::new();
    let orders = memory_consumer(&lookup, "orders", "billing", 2, 2);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut consumer = Consumer::wrap(consumer_config(), vec![as_backend(&orders)]).unwrap();
    consumer.use_interceptors([
        Arc::new(Mark("m1")) as Arc<dyn Interceptor>,
        Arc::new(Mark("m2")),
        Arc::new(Mark("m3")),
    ]);
    let recorded = seen.clone();
    consumer.handle(
        "orders",
        "billing",
        handler_fn(move |message: &mut Message| {
            let recorded = recorded.clone();
            Box::pin(async move {
                let trail = message.extensions().get::<Trail>().cloned().unwrap_or_default();
                recorded.lock().unwrap().push(trail.0.join(":"));
                Ok(())
            })
        }),
    );
    consumer.start().await.unwrap();

    lookup.publish("orders", b"a".to_vec()).await.unwrap();
    lookup.publish("orders", b"b".to_vec()).await.unwrap();
    wait_until("both messages finished", || orders.ack_stats().finished == 2).await;

    assert_eq!(*seen.lock().unwrap(), vec!["m1:m2:m3", "m1:m2:m3"]);
    consumer.stop().await.unwrap();
}
