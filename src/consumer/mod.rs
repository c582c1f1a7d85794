//! Consumer Runtime
//!
//! Sits between a broker client and application handlers. Every (topic,
//! channel) subscription gets a bounded [`WorkerPool`]; the broker feeds it
//! through a [`FlowController`] that pauses delivery when the pool falls
//! behind, and workers run each message through the [`Interceptor`] chain
//! into the application [`Handler`].
//!
//! ```text
//! ConsumerBackend ──▶ FlowController ──▶ WorkerPool queue ──▶ workers
//!        ▲                  │ throttle/resume                    │
//!        └─ max-in-flight ◀─┘                 Interceptors ──▶ Handler
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use msgflow::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup};
//! use msgflow::consumer::{handler_fn, Consumer, ConsumerConfig, Message};
//! use msgflow::middleware::Throttle;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let lookup = MemoryLookup::new();
//! let backend = Arc::new(MemoryConsumer::new(
//!     lookup,
//!     MemoryConsumerConfig::new("images", "resize").with_concurrency(8),
//! )?);
//!
//! let mut consumer = Consumer::wrap(ConsumerConfig::new(["memory://local"]), vec![backend])?;
//! consumer.use_interceptor(Arc::new(Throttle::new(Duration::from_millis(50))));
//! consumer.handle("images", "resize", handler_fn(|message: &mut Message| {
//!     Box::pin(async move {
//!         if message.payload().is_empty() {
//!             return Err("empty image".into());
//!         }
//!         Ok(())
//!     })
//! }));
//! consumer.start().await?;
//! # consumer.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod handler;
pub mod interceptor;
pub mod message;
pub mod pool;
pub mod registry;

pub use config::{ConsumerConfig, DEFAULT_POLL_INTERVAL};
pub use error::{ConsumerError, ConsumerResult};
pub use flow::{FlowController, FlowState};
pub use handler::{handler_fn, Handler, HandlerError, HandlerFn, HandlerResult};
pub use interceptor::{Interceptor, Next, Pipeline, PipelineBuilder};
pub use message::{Extensions, Info, Message};
pub use pool::{normalize_buffer_multiplier, normalize_concurrency, PoolStats, WorkerPool};
pub use registry::Consumer;

/// Queue slots per worker when neither backend nor config sets a positive value
pub const DEFAULT_BUFFER_MULTIPLIER: usize = 30;

/// Pool workers one broker-side reader is expected to keep busy
pub const BROKER_CONSUMER_RATIO: usize = 30;

#[cfg(test)]
mod tests;
