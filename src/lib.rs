//! msgflow
//!
//! A message-consumption runtime between a broker client and application
//! handlers: bounded worker pools per (topic, channel), backpressure that
//! pauses broker delivery when a pool falls behind, an interceptor chain for
//! metrics and throttling, and an allow-listed producer.

pub mod app;
pub mod broker;
pub mod consumer;
pub mod core;
pub mod middleware;
pub mod producer;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::core::version::get_api_version;
