//! # Asynchronous hand-off
//!
//! Two ways to move work off the calling task:
//!
//! - [`AsyncDelegate`] runs a separate downstream processor on the
//!   scheduler and lets the chain carry on at once with the event it had.
//! - [`AsyncInterceptingProcessor`] runs the *rest of its own chain* on the
//!   scheduler. With a reply path the chain's result is delivered there and
//!   the caller sees [`Outcome::Pending`]; without one the caller sees
//!   [`Outcome::Void`].
//!
//! Both refuse synchronous and transacted events: deferring such work would
//! break the guarantees the sender asked for.
//!
//! The downstream always receives a copy of the event without the caller's
//! reply path. Failures nobody else can observe go to the exception handler.

use crate::{exception, scheduler};
use conveyor_core::{
    BoxProcessor, Event, ExceptionHandler, FlowContext, Interceptor, Lifecycle, LifecycleError,
    MessagingError, MessagingErrorKind, Next, Outcome, ProcessResult, Processor, Scheduler,
};
use std::sync::{Arc, OnceLock};

fn ensure_deferrable(event: &Event) -> Result<(), MessagingError> {
    let kind = if event.is_transacted() {
        MessagingErrorKind::AsyncTransacted
    } else if event.is_synchronous() {
        MessagingErrorKind::AsyncSynchronous
    } else {
        return Ok(());
    };
    Err(MessagingError::new(kind).with_event(event.clone()))
}

/// Collaborators both hand-off components resolve at call time.
#[derive(Default)]
struct Collaborators {
    scheduler: Option<Arc<dyn Scheduler>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    flow: OnceLock<FlowContext>,
}

impl Collaborators {
    fn set_flow(&self, flow: &FlowContext) {
        // A component keeps the first flow it is attached to.
        let _ = self.flow.set(flow.clone());
    }

    fn scheduler(&self, event: &Event) -> Result<Arc<dyn Scheduler>, MessagingError> {
        scheduler::resolve(self.scheduler.as_ref(), self.flow.get())
            .map_err(|err| MessagingError::from(err).with_event(event.clone()))
    }

    fn exception_handler(&self) -> Arc<dyn ExceptionHandler> {
        exception::resolve(self.exception_handler.as_ref(), self.flow.get())
    }
}

/// Hands a copy of each event to a downstream processor on the scheduler.
///
/// The calling chain continues immediately with [`Outcome::Void`].
pub struct AsyncDelegate {
    delegate: BoxProcessor,
    collaborators: Collaborators,
}

impl AsyncDelegate {
    /// Delegate to `delegate`.
    pub fn new(delegate: impl Processor) -> Self {
        Self {
            delegate: delegate.boxed(),
            collaborators: Collaborators::default(),
        }
    }

    /// Use this scheduler instead of the flow's.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.collaborators.scheduler = Some(scheduler);
        self
    }

    /// Use this exception handler instead of the flow's.
    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.collaborators.exception_handler = Some(handler);
        self
    }
}

impl Lifecycle for AsyncDelegate {
    fn set_flow(&self, flow: &FlowContext) {
        self.collaborators.set_flow(flow);
        self.delegate.set_flow(flow);
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.delegate.initialise()
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.delegate.start()
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.delegate.stop()
    }

    fn dispose(&self) {
        self.delegate.dispose();
    }
}

impl Processor for AsyncDelegate {
    async fn process(&self, event: Event) -> ProcessResult {
        ensure_deferrable(&event)?;
        let scheduler = self.collaborators.scheduler(&event)?;
        let handler = self.collaborators.exception_handler();

        let copy = event.copy().without_reply_to();
        let delegate = self.delegate.clone();
        let work = async move {
            tracing::trace!(delegate = delegate.name(), event_id = %copy.id(), "running delegate");
            if let Err(mut err) = delegate.process(copy.clone()).await {
                let failed = err.take_event().unwrap_or(copy);
                handler.handle(&err, failed).await;
            }
        };
        scheduler
            .submit(Box::pin(work))
            .map_err(|err| MessagingError::from(err).with_event(event))?;
        Ok(Outcome::Void)
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "async-delegate"
    }
}

/// Runs the rest of its chain on the scheduler.
#[derive(Default)]
pub struct AsyncInterceptingProcessor {
    collaborators: Collaborators,
}

impl AsyncInterceptingProcessor {
    /// Use the flow's scheduler and exception handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this scheduler instead of the flow's.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.collaborators.scheduler = Some(scheduler);
        self
    }

    /// Use this exception handler instead of the flow's.
    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.collaborators.exception_handler = Some(handler);
        self
    }
}

impl Lifecycle for AsyncInterceptingProcessor {
    fn set_flow(&self, flow: &FlowContext) {
        self.collaborators.set_flow(flow);
    }
}

impl Interceptor for AsyncInterceptingProcessor {
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        ensure_deferrable(&event)?;
        let scheduler = self.collaborators.scheduler(&event)?;
        let handler = self.collaborators.exception_handler();

        let mut request = event.copy();
        let reply = request.take_reply_to();
        let pending = reply.is_some();
        let next = next.clone();
        let work = async move {
            let previous = request.clone();
            let result = next.process(request).await;
            match (result, reply) {
                (Ok(outcome), Some(reply)) => match outcome.or_previous(previous) {
                    Outcome::Value(event) => {
                        reply.complete(event);
                    }
                    Outcome::Pending => {
                        let kind = MessagingErrorKind::UnexpectedPending("async".to_string());
                        reply.fail(MessagingError::new(kind));
                    }
                    Outcome::Void | Outcome::Absent => {
                        reply.complete_empty();
                    }
                },
                (Ok(_), None) => {}
                (Err(err), Some(reply)) => {
                    reply.fail(err.or_event(previous));
                }
                (Err(mut err), None) => {
                    let failed = err.take_event().unwrap_or(previous);
                    handler.handle(&err, failed).await;
                }
            }
        };

        if let Err(err) = scheduler.submit(Box::pin(work)) {
            // The rejected work owned the reply path; nothing will complete it.
            return Err(MessagingError::from(err).with_event(event));
        }
        Ok(if pending { Outcome::Pending } else { Outcome::Void })
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "async"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scheduler::TokioScheduler,
        testing::{AppendingProcessor, FailingProcessor, RecordingExceptionHandler, eventually},
    };
    use conveyor_core::{ReplyTo, Transaction};
    use std::time::Duration;

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(TokioScheduler::current().unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delegate_returns_void_and_runs_later() {
        let listener = AppendingProcessor::new("1");
        let delegate = AsyncDelegate::new(listener.clone()).with_scheduler(scheduler());

        let out = delegate.process(Event::new("0")).await.unwrap();
        assert!(out.is_void());
        assert!(eventually(|| listener.invocations() == 1).await);
        assert_eq!(listener.result().unwrap().payload_str(), Some("01"));
    }

    #[tokio::test]
    async fn test_delegate_rejects_transacted_and_synchronous() {
        let listener = AppendingProcessor::new("1");
        let delegate = AsyncDelegate::new(listener.clone()).with_scheduler(scheduler());

        let transacted = Event::new("0").with_transaction(Transaction::begin());
        let err = delegate.process(transacted).await.unwrap_err();
        assert!(matches!(err.kind(), MessagingErrorKind::AsyncTransacted));

        let one_way = Event::new("0").one_way().with_transaction(Transaction::begin());
        let err = delegate.process(one_way).await.unwrap_err();
        assert!(matches!(err.kind(), MessagingErrorKind::AsyncTransacted));

        let sync = Event::new("0").synchronous(true);
        let err = delegate.process(sync).await.unwrap_err();
        assert!(matches!(err.kind(), MessagingErrorKind::AsyncSynchronous));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(listener.invocations(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delegate_failure_goes_to_handler() {
        let handler = RecordingExceptionHandler::new();
        let delegate = AsyncDelegate::new(FailingProcessor::new("boom"))
            .with_scheduler(scheduler())
            .with_exception_handler(Arc::new(handler.clone()));

        let out = delegate.process(Event::new("0")).await.unwrap();
        assert!(out.is_void());
        assert!(eventually(|| handler.count() == 1).await);
        let (message, event) = handler.handled().remove(0);
        assert_eq!(message, "processor failed: boom");
        assert_eq!(event.payload_str(), Some("0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_intercepting_delivers_to_reply() {
        let async_step = AsyncInterceptingProcessor::new().with_scheduler(scheduler());
        let (reply, rx) = ReplyTo::channel();
        let next = Next::new(AppendingProcessor::new("1"));

        let out = async_step
            .intercept(Event::new("0").with_reply_to(reply), &next)
            .await
            .unwrap();
        assert!(out.is_pending());

        let event = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.payload_str(), Some("01"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_intercepting_failure_reaches_reply_only() {
        let handler = RecordingExceptionHandler::new();
        let async_step = AsyncInterceptingProcessor::new()
            .with_scheduler(scheduler())
            .with_exception_handler(Arc::new(handler.clone()));
        let (reply, rx) = ReplyTo::channel();
        let next = Next::new(FailingProcessor::new("boom"));

        let out = async_step
            .intercept(Event::new("0").with_reply_to(reply), &next)
            .await
            .unwrap();
        assert!(out.is_pending());

        let err = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "processor failed: boom");
        assert_eq!(handler.count(), 0);
    }
}
