//! # Around Advice (Interceptor)
//!
//! An interceptor wraps everything that follows it in a chain. It receives
//! the event together with a [`Next`] continuation and decides whether, when
//! and with what event the rest of the chain runs:
//!
//! ```ignore
//! async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
//!     let before = event.with_payload(format!("{}before", text(&event)));
//!     let out = next.process(before.clone()).await?.or_previous(before);
//!     // ... post-process `out`
//! }
//! ```
//!
//! Not calling `next` short-circuits the rest of the chain. The continuation
//! is bound when the chain is built, so an interceptor never holds a mutable
//! "next" field and may be shared between chains.

use crate::{
    context::FlowContext,
    error::LifecycleError,
    event::Event,
    lifecycle::Lifecycle,
    outcome::{IntoOutcome, Outcome, ProcessResult},
    processor::{BoxProcessor, Processor},
};
use futures::future::BoxFuture;
use std::{fmt, future::Future, sync::Arc};

/// A processor that runs around the rest of its chain.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an `Interceptor`",
    label = "missing `Interceptor` implementation",
    note = "Interceptors implement `intercept(event, next)` and `Lifecycle`."
)]
pub trait Interceptor: Lifecycle + Send + Sync + 'static {
    /// Process `event`, optionally delegating to `next`.
    fn intercept(&self, event: Event, next: &Next)
    -> impl Future<Output = ProcessResult> + Send;

    /// Whether this interceptor can complete through the event's reply path.
    fn is_non_blocking(&self) -> bool {
        false
    }

    /// A name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Boxes the interceptor.
    fn boxed(self) -> BoxInterceptor
    where
        Self: Sized,
    {
        BoxInterceptor::new(self)
    }
}

/// Dynamic object-safe version of [`Interceptor`].
pub trait DynInterceptor: Lifecycle + Send + Sync + 'static {
    /// Intercept (dynamic dispatch version).
    fn intercept_dyn<'a>(&'a self, event: Event, next: &'a Next)
    -> BoxFuture<'a, ProcessResult>;

    /// See [`Interceptor::is_non_blocking`].
    fn is_non_blocking_dyn(&self) -> bool;

    /// See [`Interceptor::name`].
    fn name_dyn(&self) -> &str;
}

impl<I: Interceptor> DynInterceptor for I {
    fn intercept_dyn<'a>(
        &'a self,
        event: Event,
        next: &'a Next,
    ) -> BoxFuture<'a, ProcessResult> {
        Box::pin(self.intercept(event, next))
    }

    fn is_non_blocking_dyn(&self) -> bool {
        self.is_non_blocking()
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// A type-erased, cheaply clonable interceptor.
#[derive(Clone)]
pub struct BoxInterceptor {
    inner: Arc<dyn DynInterceptor>,
}

impl BoxInterceptor {
    /// Erase an interceptor.
    pub fn new<I: Interceptor>(interceptor: I) -> Self {
        Self {
            inner: Arc::new(interceptor),
        }
    }
}

impl fmt::Debug for BoxInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxInterceptor")
            .field(&self.inner.name_dyn())
            .finish()
    }
}

impl Lifecycle for BoxInterceptor {
    fn set_flow(&self, flow: &FlowContext) {
        self.inner.set_flow(flow);
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.inner.initialise()
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.inner.start()
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.inner.stop()
    }

    fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Interceptor for BoxInterceptor {
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        self.inner.intercept_dyn(event, next).await
    }

    fn is_non_blocking(&self) -> bool {
        self.inner.is_non_blocking_dyn()
    }

    fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    fn boxed(self) -> BoxInterceptor {
        self
    }
}

impl<I: Interceptor> Interceptor for Arc<I> {
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        (**self).intercept(event, next).await
    }

    fn is_non_blocking(&self) -> bool {
        (**self).is_non_blocking()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The rest of the chain, as seen by an interceptor.
#[derive(Clone, Default)]
pub struct Next {
    inner: Option<BoxProcessor>,
}

impl Next {
    /// A continuation running `processor`.
    pub fn new(processor: impl Processor) -> Self {
        Self {
            inner: Some(processor.boxed()),
        }
    }

    /// A continuation with nothing left to run.
    pub fn end() -> Self {
        Self { inner: None }
    }

    /// Whether nothing follows.
    pub fn is_end(&self) -> bool {
        self.inner.is_none()
    }

    /// Run the rest of the chain. With nothing left the event comes back
    /// unchanged.
    pub async fn process(&self, event: Event) -> ProcessResult {
        match &self.inner {
            Some(processor) => processor.process(event).await,
            None => Ok(Outcome::Value(event)),
        }
    }

    /// Whether the rest of the chain can complete through a reply path.
    pub fn is_non_blocking(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|processor| processor.is_non_blocking())
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(processor) => f.debug_tuple("Next").field(processor).finish(),
            None => f.write_str("Next(end)"),
        }
    }
}

/// An interceptor backed by an async closure. See [`interceptor_fn`].
pub struct FnInterceptor<F> {
    name: Arc<str>,
    f: F,
}

/// Wrap an async closure as an [`Interceptor`].
///
/// The closure receives an owned clone of the continuation so that it can be
/// moved into the returned future.
pub fn interceptor_fn<F, Fut, R>(name: impl Into<Arc<str>>, f: F) -> FnInterceptor<F>
where
    F: Fn(Event, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: IntoOutcome,
{
    FnInterceptor {
        name: name.into(),
        f,
    }
}

impl<F> Lifecycle for FnInterceptor<F> {}

impl<F, Fut, R> Interceptor for FnInterceptor<F>
where
    F: Fn(Event, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: IntoOutcome,
{
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        (self.f)(event, next.clone()).await.into_outcome()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::processor_fn;

    fn append(suffix: &'static str) -> impl Processor {
        processor_fn(suffix, move |event: Event| async move {
            let text = format!("{}{suffix}", event.payload_str().unwrap_or_default());
            event.with_payload(text)
        })
    }

    #[tokio::test]
    async fn test_end_returns_event() {
        let next = Next::end();
        assert!(next.is_end());
        assert!(next.is_non_blocking());
        let out = next.process(Event::new("0")).await.unwrap();
        assert_eq!(out.event().unwrap().payload_str(), Some("0"));
    }

    #[tokio::test]
    async fn test_interceptor_wraps_next() {
        let around = interceptor_fn("around", |event: Event, next: Next| async move {
            let before = event.with_payload(format!("{}before", event.payload_str().unwrap_or_default()));
            let out = next.process(before.clone()).await?.or_previous(before);
            let Some(after) = out.into_event() else {
                return Ok(Outcome::Absent);
            };
            let text = format!("{}after", after.payload_str().unwrap_or_default());
            Ok::<_, crate::MessagingError>(Outcome::Value(after.with_payload(text)))
        });

        let out = around
            .intercept(Event::new("0"), &Next::new(append("1")))
            .await
            .unwrap();
        assert_eq!(out.event().unwrap().payload_str(), Some("0before1after"));
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let stop = interceptor_fn("stop", |event: Event, _next: Next| async move { event });
        let out = stop
            .boxed()
            .intercept(Event::new("0"), &Next::new(append("1")))
            .await
            .unwrap();
        assert_eq!(out.event().unwrap().payload_str(), Some("0"));
    }

    #[tokio::test]
    async fn test_boxed_and_shared_interceptors_delegate() {
        let around = interceptor_fn("around", |event: Event, next: Next| async move {
            let text = format!("{}[", event.payload_str().unwrap_or_default());
            next.process(event.with_payload(text)).await
        });
        let shared = Arc::new(around).boxed();
        assert_eq!(shared.name(), "around");

        let next = Next::new(append("1"));
        let out = shared.intercept(Event::new("0"), &next).await.unwrap();
        assert_eq!(out.event().unwrap().payload_str(), Some("0[1"));
    }
}
