//! Built-in interceptors
//!
//! * [`Metrics`] reports handling duration, outcome, worker, throttle and
//!   buffer data points for every message.
//! * [`Throttle`] delays messages handed off while their pool is throttled.
//!
//! Register [`Metrics`] before [`Throttle`] so the throttle delay is part of
//! the measured duration and the reported throttle status reflects it.

mod metrics;
mod throttle;

pub use self::metrics::Metrics;
pub use self::throttle::Throttle;
