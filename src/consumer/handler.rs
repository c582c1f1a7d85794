//! Message handler trait
//!
//! Application code implements [`Handler`] (or wraps a closure with
//! [`handler_fn`]). The returned error is what the worker pool reports back
//! to the broker as a requeue, so handlers should return it rather than log
//! and swallow it.

use crate::consumer::message::Message;
use futures::future::BoxFuture;

/// Error type returned by application handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of handling one message
pub type HandlerResult = Result<(), HandlerError>;

/// Application-level message handler
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &mut Message) -> HandlerResult;
}

/// [`Handler`] adapter for closures returning a boxed future
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure as a [`Handler`]
///
/// ```rust
/// use msgflow::consumer::{handler_fn, Message};
///
/// let handler = handler_fn(|message: &mut Message| {
///     Box::pin(async move {
///         log::info!("got {} bytes", message.payload().len());
///         Ok(())
///     })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Message) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    HandlerFn { f }
}

#[async_trait::async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Message) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn handle(&self, message: &mut Message) -> HandlerResult {
        (self.f)(message).await
    }
}
