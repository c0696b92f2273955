//! # Processor Chains
//!
//! A [`Chain`] composes processors, interceptors and nested chains into a
//! single [`Processor`].
//!
//! # Resolution
//!
//! [`ChainBuilder::build`] resolves the structure once. Consecutive plain
//! processors form a run that an executor walks. An interceptor ends the run:
//! everything after it becomes an internal chain bound to the interceptor as
//! its [`Next`], so the interceptor re-enters the chain itself instead of the
//! executor iterating past it.
//!
//! ```text
//! [I1, P2, P3, I4, P5]  =>  run: [I1 ~ next: [P2, P3, I4 ~ next: [P5]]]
//! ```
//!
//! # Lifecycle
//!
//! A chain forwards lifecycle calls to the components it was built from,
//! including nested chains, in construction order for `set_flow`,
//! `initialise` and `start` and in reverse order for `stop` and `dispose`.
//! Internal chains created for interceptor continuations do not forward
//! anything, so each component sees every call exactly once.

use crate::{
    executor::{BlockingExecutor, ExecutionMode, NonBlockingExecutor},
    scheduler,
};
use conveyor_core::{
    BoxInterceptor, BoxProcessor, Event, FlowContext, Interceptor, Lifecycle, LifecycleError,
    LifecycleState, MessagingError, Next, Phase, ProcessResult, Processor, Scheduler,
    SchedulerError,
};
use std::{
    future::Future,
    sync::{Arc, OnceLock},
};

/// Anything that can produce a processor for a chain.
pub trait ProcessorBuilder {
    /// Build the processor.
    fn build_processor(self) -> BoxProcessor;
}

impl ProcessorBuilder for ChainBuilder {
    fn build_processor(self) -> BoxProcessor {
        self.build().boxed()
    }
}

#[derive(Clone)]
enum Component {
    Processor(BoxProcessor),
    Interceptor(BoxInterceptor),
}

impl Component {
    fn set_flow(&self, flow: &FlowContext) {
        match self {
            Component::Processor(p) => p.set_flow(flow),
            Component::Interceptor(i) => i.set_flow(flow),
        }
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        match self {
            Component::Processor(p) => p.initialise(),
            Component::Interceptor(i) => i.initialise(),
        }
    }

    fn start(&self) -> Result<(), LifecycleError> {
        match self {
            Component::Processor(p) => p.start(),
            Component::Interceptor(i) => i.start(),
        }
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        match self {
            Component::Processor(p) => p.stop(),
            Component::Interceptor(i) => i.stop(),
        }
    }

    fn dispose(&self) {
        match self {
            Component::Processor(p) => p.dispose(),
            Component::Interceptor(i) => i.dispose(),
        }
    }
}

/// Collects the components of a [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    name: Option<Arc<str>>,
    components: Vec<Component>,
}

impl ChainBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty builder for a named chain.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: Some(name.into()),
            components: Vec::new(),
        }
    }

    /// Append a plain processor (or a nested [`Chain`]).
    pub fn processor(mut self, processor: impl Processor) -> Self {
        self.components
            .push(Component::Processor(processor.boxed()));
        self
    }

    /// Append several processors.
    pub fn processors(mut self, processors: impl IntoIterator<Item = BoxProcessor>) -> Self {
        self.components
            .extend(processors.into_iter().map(Component::Processor));
        self
    }

    /// Append an interceptor. It wraps everything appended after it.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.components
            .push(Component::Interceptor(interceptor.boxed()));
        self
    }

    /// Append whatever `builder` produces, e.g. a nested chain.
    pub fn builder(mut self, builder: impl ProcessorBuilder) -> Self {
        self.components
            .push(Component::Processor(builder.build_processor()));
        self
    }

    /// Number of components added so far.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Resolve the chain.
    pub fn build(self) -> Chain {
        let name = self.name.unwrap_or_else(|| Arc::from("chain"));
        let flow = Arc::new(OnceLock::new());

        // Walk backwards so each interceptor can capture what follows it.
        let mut run: Vec<BoxProcessor> = Vec::new();
        for component in self.components.iter().rev() {
            match component {
                Component::Processor(processor) => run.push(processor.clone()),
                Component::Interceptor(interceptor) => {
                    run.reverse();
                    let next = if run.is_empty() {
                        Next::end()
                    } else {
                        Next::new(Chain::internal(
                            name.clone(),
                            std::mem::take(&mut run),
                            flow.clone(),
                        ))
                    };
                    run.push(
                        BoundInterceptor {
                            interceptor: interceptor.clone(),
                            next,
                        }
                        .boxed(),
                    );
                }
            }
        }
        run.reverse();

        Chain {
            inner: Arc::new(Inner {
                name,
                components: self.components,
                run: run.into(),
                flow,
                state: LifecycleState::new(),
            }),
        }
    }
}

/// An interceptor together with the continuation it was bound to.
struct BoundInterceptor {
    interceptor: BoxInterceptor,
    next: Next,
}

// Lifecycle reaches the interceptor through the owning chain's components.
impl Lifecycle for BoundInterceptor {}

impl Processor for BoundInterceptor {
    fn process(&self, event: Event) -> impl Future<Output = ProcessResult> + Send {
        self.interceptor.intercept(event, &self.next)
    }

    fn is_non_blocking(&self) -> bool {
        self.interceptor.is_non_blocking()
    }

    fn name(&self) -> &str {
        self.interceptor.name()
    }
}

/// A built, immutable chain of processors.
#[derive(Clone)]
pub struct Chain {
    inner: Arc<Inner>,
}

struct Inner {
    name: Arc<str>,
    /// What lifecycle calls are forwarded to. Empty for internal chains.
    components: Vec<Component>,
    run: Arc<[BoxProcessor]>,
    /// Shared with the internal chains built for interceptor continuations.
    flow: Arc<OnceLock<FlowContext>>,
    state: LifecycleState,
}

impl Chain {
    /// Start building a chain.
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    fn internal(name: Arc<str>, run: Vec<BoxProcessor>, flow: Arc<OnceLock<FlowContext>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                components: Vec::new(),
                run: run.into(),
                flow,
                state: LifecycleState::new(),
            }),
        }
    }

    /// The flattened list an executor walks.
    pub fn steps(&self) -> &[BoxProcessor] {
        &self.inner.run
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.phase()
    }

    /// The flow this chain was attached to, if any.
    pub fn flow(&self) -> Option<&FlowContext> {
        self.inner.flow.get()
    }

    fn scheduler(&self) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        scheduler::resolve(None, self.flow())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.inner.name)
            .field("steps", &self.inner.run)
            .finish()
    }
}

impl Lifecycle for Chain {
    fn set_flow(&self, flow: &FlowContext) {
        if self.inner.flow.set(flow.clone()).is_err() {
            tracing::debug!(chain = %self.inner.name, "flow already set, keeping the first");
        }
        for component in &self.inner.components {
            component.set_flow(flow);
        }
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Initialised)?;
        self.inner
            .components
            .iter()
            .try_for_each(Component::initialise)
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Started)?;
        self.inner
            .components
            .iter()
            .try_for_each(Component::start)
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Stopped)?;
        self.inner
            .components
            .iter()
            .rev()
            .try_for_each(Component::stop)
    }

    fn dispose(&self) {
        if self.inner.state.transition(Phase::Disposed).is_err() {
            return;
        }
        for component in self.inner.components.iter().rev() {
            component.dispose();
        }
    }
}

impl Processor for Chain {
    async fn process(&self, event: Event) -> ProcessResult {
        match ExecutionMode::for_event(&event) {
            ExecutionMode::Blocking => BlockingExecutor.execute(&self.inner.run, event).await,
            ExecutionMode::NonBlocking => {
                let scheduler = match self.scheduler() {
                    Ok(scheduler) => scheduler,
                    Err(err) => return Err(MessagingError::from(err).with_event(event)),
                };
                NonBlockingExecutor::new(scheduler)
                    .execute(self.inner.run.clone(), event)
                    .await
            }
        }
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AppendingInterceptor, AppendingProcessor, ReturnAbsent, text};

    #[test]
    fn test_resolution_flattens_interceptors() {
        let chain = ChainBuilder::new()
            .interceptor(AppendingInterceptor::new("1"))
            .processor(AppendingProcessor::new("2"))
            .processor(AppendingProcessor::new("3"))
            .interceptor(AppendingInterceptor::new("4"))
            .processor(AppendingProcessor::new("5"))
            .build();
        assert_eq!(chain.steps().len(), 1);

        let plain = ChainBuilder::new()
            .processor(AppendingProcessor::new("1"))
            .processor(AppendingProcessor::new("2"))
            .interceptor(AppendingInterceptor::new("3"))
            .build();
        assert_eq!(plain.steps().len(), 3);
    }

    #[tokio::test]
    async fn test_mixed_chain() {
        let chain = ChainBuilder::new()
            .interceptor(AppendingInterceptor::new("1"))
            .processor(AppendingProcessor::new("2"))
            .processor(AppendingProcessor::new("3"))
            .interceptor(AppendingInterceptor::new("4"))
            .processor(AppendingProcessor::new("5"))
            .build();
        let out = chain.process(Event::new("0")).await.unwrap();
        assert_eq!(text(&out), "0before123before45after4after1");
    }

    #[tokio::test]
    async fn test_absent_inside_interceptor_scope() {
        let tail = AppendingProcessor::new("3");
        let chain = ChainBuilder::new()
            .interceptor(AppendingInterceptor::new("1"))
            .processor(AppendingProcessor::new("2"))
            .processor(ReturnAbsent::default())
            .processor(tail.clone())
            .build();
        let out = chain.process(Event::new("0")).await.unwrap();
        assert!(out.is_absent());
        assert!(tail.sensed().is_none());
    }

    #[test]
    fn test_lifecycle_is_guarded() {
        let chain = ChainBuilder::new()
            .processor(AppendingProcessor::new("1"))
            .build();
        chain.initialise().unwrap();
        assert!(chain.initialise().is_err());
        chain.start().unwrap();
        assert_eq!(chain.phase(), Phase::Started);
    }
}
