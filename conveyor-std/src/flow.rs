//! # Flows
//!
//! A [`Flow`] owns a [`Chain`] together with the collaborators its
//! components share: the scheduler deferred work runs on and the exception
//! handler for failures. Building a flow hands its [`FlowContext`] to every
//! component through [`Lifecycle::set_flow`].
//!
//! Failures of a blocking call go straight back to the caller. When an event
//! completes through its reply path, a failure is first given to the flow's
//! exception handler and then delivered to the reply path, once.

use crate::{
    chain::{Chain, ChainBuilder, ProcessorBuilder},
    exception::LoggingExceptionHandler,
    executor::ExecutionMode,
    scheduler::{SchedulerConfig, TokioScheduler},
};
use conveyor_core::{
    BoxProcessor, Event, ExceptionHandler, FlowContext, Interceptor, Lifecycle, LifecycleError,
    LifecycleState, MessagingError, Outcome, Payload, Phase, ProcessResult, Processor, Reply,
    ReplyTo, Scheduler, SchedulerError,
};
use std::sync::Arc;

/// Configures a [`Flow`].
pub struct FlowBuilder {
    name: Arc<str>,
    scheduler: Option<Arc<dyn Scheduler>>,
    scheduler_config: Option<SchedulerConfig>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    chain: ChainBuilder,
}

impl FlowBuilder {
    fn new(name: Arc<str>) -> Self {
        Self {
            chain: ChainBuilder::named(name.clone()),
            name,
            scheduler: None,
            scheduler_config: None,
            exception_handler: None,
        }
    }

    /// Run deferred work on `scheduler`.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Run deferred work on a [`TokioScheduler`] configured by `config`.
    ///
    /// Ignored when an explicit [`scheduler`](Self::scheduler) is set.
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = Some(config);
        self
    }

    /// Hand failures to `handler`. Defaults to [`LoggingExceptionHandler`].
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Append a processor.
    pub fn processor(mut self, processor: impl Processor) -> Self {
        self.chain = self.chain.processor(processor);
        self
    }

    /// Append several processors.
    pub fn processors(mut self, processors: impl IntoIterator<Item = BoxProcessor>) -> Self {
        self.chain = self.chain.processors(processors);
        self
    }

    /// Append an interceptor.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.chain = self.chain.interceptor(interceptor);
        self
    }

    /// Append whatever `builder` produces.
    pub fn builder(mut self, builder: impl ProcessorBuilder) -> Self {
        self.chain = self.chain.builder(builder);
        self
    }

    /// Build the flow and attach its components to it.
    ///
    /// Without an explicit scheduler this must run inside a tokio runtime.
    pub fn build(self) -> Result<Flow, SchedulerError> {
        let scheduler: Arc<dyn Scheduler> = match (self.scheduler, self.scheduler_config) {
            (Some(scheduler), _) => scheduler,
            (None, Some(config)) => Arc::new(TokioScheduler::from_config(config)?),
            (None, None) => Arc::new(TokioScheduler::from_config(SchedulerConfig {
                name: self.name.to_string(),
                ..SchedulerConfig::default()
            })?),
        };
        let exception_handler = self
            .exception_handler
            .unwrap_or_else(|| Arc::new(LoggingExceptionHandler));

        let context = FlowContext::new(self.name, scheduler, exception_handler);
        let chain = self.chain.build();
        chain.set_flow(&context);
        tracing::debug!(flow = context.name(), steps = chain.steps().len(), "flow built");

        Ok(Flow {
            inner: Arc::new(Inner {
                context,
                chain,
                state: LifecycleState::new(),
            }),
        })
    }
}

/// A named chain with its own scheduler and exception handler.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<Inner>,
}

struct Inner {
    context: FlowContext,
    chain: Chain,
    state: LifecycleState,
}

impl Flow {
    /// Start configuring a flow called `name`.
    pub fn builder(name: impl Into<Arc<str>>) -> FlowBuilder {
        FlowBuilder::new(name.into())
    }

    /// The flow name.
    pub fn name(&self) -> &str {
        self.inner.context.name()
    }

    /// What the flow hands to its components.
    pub fn context(&self) -> &FlowContext {
        &self.inner.context
    }

    /// The chain the flow runs.
    pub fn chain(&self) -> &Chain {
        &self.inner.chain
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.phase()
    }

    /// A reply path that lets the exception handler see a failure before
    /// `reply` does.
    fn handled_reply(&self, reply: ReplyTo) -> ReplyTo {
        let context = self.inner.context.clone();
        ReplyTo::new(move |result: Reply| match result {
            Err(mut err) => {
                let handler = context.exception_handler().clone();
                let target = reply.clone();
                let work = async move {
                    match err.take_event() {
                        Some(event) => {
                            let handled = handler.handle(&err, event).await;
                            target.fail(err.with_event(handled));
                        }
                        None => {
                            handler.handle(&err, Event::new(Payload::Empty)).await;
                            target.fail(err);
                        }
                    }
                };
                if let Err(rejected) = context.scheduler().submit(Box::pin(work)) {
                    tracing::warn!(
                        flow = context.name(),
                        error = %rejected,
                        "cannot run exception handler"
                    );
                    reply.fail(MessagingError::from(rejected));
                }
            }
            other => {
                reply.reply(other);
            }
        })
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name())
            .field("phase", &self.phase())
            .field("chain", &self.inner.chain)
            .finish()
    }
}

impl Lifecycle for Flow {
    // A flow keeps its own context even when nested in another flow.
    fn set_flow(&self, _flow: &FlowContext) {}

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Initialised)?;
        self.inner.chain.initialise()
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Started)?;
        self.inner.chain.start()
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.inner.state.transition(Phase::Stopped)?;
        self.inner.chain.stop()
    }

    fn dispose(&self) {
        if self.inner.state.transition(Phase::Disposed).is_ok() {
            self.inner.chain.dispose();
        }
    }
}

impl Processor for Flow {
    async fn process(&self, mut event: Event) -> ProcessResult {
        let reply = match ExecutionMode::for_event(&event) {
            ExecutionMode::NonBlocking => event.take_reply_to(),
            ExecutionMode::Blocking => None,
        };
        let Some(reply) = reply else {
            return self.inner.chain.process(event).await;
        };

        let handled = self.handled_reply(reply.clone());
        let result = self
            .inner
            .chain
            .process(event.with_reply_to(handled.clone()))
            .await;
        if matches!(result, Ok(Outcome::Pending)) {
            return Ok(Outcome::Pending);
        }
        let used = !handled.disarm();
        if used && result.is_ok() {
            return Ok(Outcome::Pending);
        }
        // Answered directly; the caller sees the result itself.
        drop(reply);
        result
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        self.inner.context.name()
    }
}
