//! Throttle interceptor

use crate::consumer::{HandlerResult, Interceptor, Message, Next};
use std::time::Duration;

/// Slows handling down while the owning pool is throttled
///
/// Messages stamped with `info.throttle_flag` wait `delay` before the rest of
/// the chain runs and are marked `info.throttled`. Other messages pass
/// straight through.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait::async_trait]
impl Interceptor for Throttle {
    async fn invoke(&self, message: &mut Message, next: Next<'_>) -> HandlerResult {
        if message.info.throttle_flag {
            log::trace!(
                "Delaying message {} on {}/{} by {:?}",
                message.id(),
                message.topic,
                message.channel,
                self.delay
            );
            tokio::time::sleep(self.delay).await;
            message.info.throttled = true;
        }
        next.run(message).await
    }
}
