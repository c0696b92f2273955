//! # Processing Unit (Processor)
//!
//! A processor takes an [`Event`] and yields an [`Outcome`](crate::Outcome). It is the
//! indivisible unit of work in a flow: chains, interceptors, routers and
//! whole flows are processors themselves when seen from outside.
//!
//! # Static vs Dynamic Dispatch
//!
//! [`Processor`] uses native `async fn` for zero-cost static dispatch.
//! Chains store their steps as [`BoxProcessor`], which goes through the
//! object-safe [`DynProcessor`] twin.
//!
//! # Non-blocking capability
//!
//! A processor that reports [`Processor::is_non_blocking`] promises that when
//! the event it receives carries a reply path it may return
//! [`Outcome::Pending`](crate::Outcome::Pending) and complete that reply path exactly once later.
//! Processors that never suspend leave the default `false`.

use crate::{
    context::FlowContext,
    error::LifecycleError,
    event::Event,
    lifecycle::Lifecycle,
    outcome::{IntoOutcome, ProcessResult},
};
use futures::future::BoxFuture;
use std::{fmt, future::Future, sync::Arc};

/// A unit of message processing.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `Processor`",
    label = "missing `Processor` implementation",
    note = "Processors implement `process` and `Lifecycle` (often via `#[derive(Lifecycle)]`)."
)]
pub trait Processor: Lifecycle + Send + Sync + 'static {
    /// Process an event.
    fn process(&self, event: Event) -> impl Future<Output = ProcessResult> + Send;

    /// Whether this processor can complete through the event's reply path.
    fn is_non_blocking(&self) -> bool {
        false
    }

    /// A name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Boxes the processor.
    fn boxed(self) -> BoxProcessor
    where
        Self: Sized,
    {
        BoxProcessor::new(self)
    }
}

/// Dynamic object-safe version of [`Processor`].
pub trait DynProcessor: Lifecycle + Send + Sync + 'static {
    /// Process an event (dynamic dispatch version).
    fn process_dyn(&self, event: Event) -> BoxFuture<'_, ProcessResult>;

    /// See [`Processor::is_non_blocking`].
    fn is_non_blocking_dyn(&self) -> bool;

    /// See [`Processor::name`].
    fn name_dyn(&self) -> &str;
}

impl<P: Processor> DynProcessor for P {
    fn process_dyn(&self, event: Event) -> BoxFuture<'_, ProcessResult> {
        Box::pin(self.process(event))
    }

    fn is_non_blocking_dyn(&self) -> bool {
        self.is_non_blocking()
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// A type-erased, cheaply clonable processor.
#[derive(Clone)]
pub struct BoxProcessor {
    inner: Arc<dyn DynProcessor>,
}

impl BoxProcessor {
    /// Erase a processor.
    pub fn new<P: Processor>(processor: P) -> Self {
        Self {
            inner: Arc::new(processor),
        }
    }

    /// Whether two handles refer to the same processor.
    pub fn ptr_eq(&self, other: &BoxProcessor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BoxProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxProcessor")
            .field(&self.inner.name_dyn())
            .finish()
    }
}

impl Lifecycle for BoxProcessor {
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

impl Processor for BoxProcessor {
    fn process(&self, event: Event) -> impl Future<Output = ProcessResult> + Send {
        self.inner.process_dyn(event)
    }

    fn is_non_blocking(&self) -> bool {
        self.inner.is_non_blocking_dyn()
    }

    fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    fn boxed(self) -> BoxProcessor {
        self
    }
}

impl<P: Lifecycle + ?Sized> Lifecycle for Arc<P> {
    fn set_flow(&self, flow: &FlowContext) {
        (**self).set_flow(flow);
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        (**self).initialise()
    }

    fn start(&self) -> Result<(), LifecycleError> {
        (**self).start()
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        (**self).stop()
    }

    fn dispose(&self) {
        (**self).dispose();
    }
}

impl<P: Processor> Processor for Arc<P> {
    fn process(&self, event: Event) -> impl Future<Output = ProcessResult> + Send {
        (**self).process(event)
    }

    fn is_non_blocking(&self) -> bool {
        (**self).is_non_blocking()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A processor backed by an async closure. See [`processor_fn`].
pub struct FnProcessor<F> {
    name: Arc<str>,
    f: F,
}

/// Wrap an async closure as a [`Processor`].
///
/// The closure may return anything implementing [`IntoOutcome`]: an
/// [`Event`], `Option<Event>`, `()` for "leave the event as it was", an
/// [`Outcome`](crate::Outcome), or a `Result` of any of those.
pub fn processor_fn<F, Fut, R>(name: impl Into<Arc<str>>, f: F) -> FnProcessor<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: IntoOutcome,
{
    FnProcessor {
        name: name.into(),
        f,
    }
}

impl<F> Lifecycle for FnProcessor<F> {}

impl<F, Fut, R> Processor for FnProcessor<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: IntoOutcome,
{
    async fn process(&self, event: Event) -> ProcessResult {
        (self.f)(event).await.into_outcome()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
