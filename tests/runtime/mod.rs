pub mod backpressure;
pub mod lifecycle;
pub mod middleware;
pub mod producer;
