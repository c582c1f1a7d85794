//! In-process broker
//!
//! A lookup registry, consumer backend and producer backend that live in the
//! same process. Used by the integration tests and the `simulate` command to
//! drive the consumer runtime without a network broker.
//!
//! ```rust,no_run
//! use msgflow::broker::memory::{MemoryConsumer, MemoryConsumerConfig, MemoryLookup, MemoryProducer};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lookup = MemoryLookup::new();
//! let consumer = MemoryConsumer::new(
//!     lookup.clone(),
//!     MemoryConsumerConfig::new("orders", "billing").with_concurrency(4),
//! )?;
//! let producer = MemoryProducer::new(lookup);
//! # let _ = (consumer, producer);
//! # Ok(())
//! # }
//! ```

mod consumer;
mod lookup;
mod producer;

pub use consumer::{MemoryConsumer, MemoryConsumerConfig};
pub use lookup::{AckSnapshot, AckStats, MemoryLookup, DEFAULT_MAX_ATTEMPTS};
pub use producer::MemoryProducer;
