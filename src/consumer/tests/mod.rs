//! Test modules for the consumer runtime
//!
//! Organised by component: message values, the interceptor chain, the worker
//! pool, the backpressure controller and the registry lifecycle.
