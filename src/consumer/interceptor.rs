//! Interceptor chain
//!
//! Cross-cutting behaviour (metrics, throttling) wraps the application
//! [`Handler`] as an ordered list of [`Interceptor`]s. The chain is frozen
//! into a [`Pipeline`] once, when a subscription is registered, and is not
//! rebuilt per message.
//!
//! Composition is onion-shaped: for interceptors registered as `[a, b, c]`
//! the call order is `a → b → c → handler → c → b → a`, so the first
//! registered interceptor sees the message first on the way in and the
//! result last on the way out.

use crate::consumer::handler::{Handler, HandlerResult};
use crate::consumer::message::Message;
use std::sync::Arc;

/// A single link in the handler chain
///
/// Implementations must return the result of `next.run(message)` unchanged
/// in content; they may observe an error but not swallow it.
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
    async fn invoke(&self, message: &mut Message, next: Next<'_>) -> HandlerResult;
}

/// The remainder of the chain after the current interceptor
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain, ending in the application handler
    pub async fn run(self, message: &mut Message) -> HandlerResult {
        match self.interceptors.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    interceptors: rest,
                    handler: self.handler,
                };
                current.invoke(message, next).await
            }
            None => self.handler.handle(message).await,
        }
    }
}

/// Identity comparison for interceptor handles (data pointer only)
pub(crate) fn same_interceptor(a: &Arc<dyn Interceptor>, b: &Arc<dyn Interceptor>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Builder collecting interceptors in registration order
///
/// Adding an interceptor handle that is already present (same allocation)
/// is a no-op, so repeated registration is idempotent.
#[derive(Default, Clone)]
pub struct PipelineBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor unless the same handle is already registered.
    /// Returns true if it was added.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) -> bool {
        if self
            .interceptors
            .iter()
            .any(|existing| same_interceptor(existing, &interceptor))
        {
            return false;
        }
        self.interceptors.push(interceptor);
        true
    }

    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Freeze the current interceptor list around `handler`
    pub fn build(&self, handler: Arc<dyn Handler>) -> Pipeline {
        Pipeline {
            interceptors: self.interceptors.clone().into(),
            handler,
        }
    }
}

/// A composed, immutable handler chain
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    /// Pipeline with no interceptors
    pub fn bare(handler: Arc<dyn Handler>) -> Self {
        PipelineBuilder::new().build(handler)
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Run `message` through every interceptor and the handler
    pub async fn dispatch(&self, message: &mut Message) -> HandlerResult {
        Next {
            interceptors: &self.interceptors,
            handler: self.handler.as_ref(),
        }
        .run(message)
        .await
    }
}
