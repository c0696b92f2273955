//! Response processing.

use crate::scheduler;
use conveyor_core::{
    BoxProcessor, Event, FlowContext, Interceptor, Lifecycle, LifecycleError, MessagingError,
    MessagingErrorKind, Next, Outcome, ProcessResult, Processor, Reply, ReplyTo,
};
use std::sync::OnceLock;

/// Runs a response processor over whatever the rest of the chain produced.
///
/// `Void` and `Absent` results pass through untouched. When the rest of the
/// chain completes through a reply path the response processor is applied
/// on the way back, before the original reply path sees the result.
pub struct ResponseProcessorAdapter {
    response: BoxProcessor,
    flow: OnceLock<FlowContext>,
}

impl ResponseProcessorAdapter {
    /// Apply `response` to downstream results.
    pub fn new(response: impl Processor) -> Self {
        Self {
            response: response.boxed(),
            flow: OnceLock::new(),
        }
    }
}

async fn respond(response: &BoxProcessor, outcome: Outcome) -> ProcessResult {
    match outcome {
        Outcome::Value(event) => {
            let event = event.without_reply_to();
            let previous = event.clone();
            match response.process(event).await {
                Ok(outcome) => Ok(outcome.or_previous(previous)),
                Err(err) => Err(err.or_event(previous)),
            }
        }
        other => Ok(other),
    }
}

impl Lifecycle for ResponseProcessorAdapter {
    fn set_flow(&self, flow: &FlowContext) {
        let _ = self.flow.set(flow.clone());
        self.response.set_flow(flow);
    }

    fn initialise(&self) -> Result<(), LifecycleError> {
        self.response.initialise()
    }

    fn start(&self) -> Result<(), LifecycleError> {
        self.response.start()
    }

    fn stop(&self) -> Result<(), LifecycleError> {
        self.response.stop()
    }

    fn dispose(&self) {
        self.response.dispose();
    }
}

impl Interceptor for ResponseProcessorAdapter {
    async fn intercept(&self, mut event: Event, next: &Next) -> ProcessResult {
        let reply = if event.allows_non_blocking() {
            event.take_reply_to()
        } else {
            None
        };
        let Some(reply) = reply else {
            let outcome = next.process(event).await?;
            return respond(&self.response, outcome).await;
        };

        let scheduler = scheduler::resolve(None, self.flow.get())
            .map_err(|err| MessagingError::from(err).with_event(event.clone()))?;
        let response = self.response.clone();
        let original = reply.clone();
        let decorated = ReplyTo::new(move |result: Reply| match result {
            Ok(Some(event)) => {
                let target = original.clone();
                let work = async move {
                    match respond(&response, Outcome::Value(event)).await {
                        Ok(Outcome::Value(event)) => {
                            target.complete(event);
                        }
                        Ok(Outcome::Pending) => {
                            let kind = MessagingErrorKind::UnexpectedPending(
                                response.name().to_string(),
                            );
                            target.fail(MessagingError::new(kind));
                        }
                        Ok(Outcome::Void | Outcome::Absent) => {
                            target.complete_empty();
                        }
                        Err(err) => {
                            target.fail(err);
                        }
                    }
                };
                if let Err(err) = scheduler.submit(Box::pin(work)) {
                    original.fail(MessagingError::from(err));
                }
            }
            other => {
                original.reply(other);
            }
        });

        let result = next
            .process(event.with_reply_to(decorated.clone()))
            .await;
        if matches!(result, Ok(Outcome::Pending)) {
            return Ok(Outcome::Pending);
        }
        let used = !decorated.disarm();
        if used && result.is_ok() {
            return Ok(Outcome::Pending);
        }
        // The rest of the chain answered directly, so answer directly too and
        // leave the caller's reply path to the caller.
        drop(reply);
        respond(&self.response, result?).await
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "response"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        AppendingProcessor, FailingProcessor, NonBlockingAppender, ReturnAbsent, text,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_applies_response_to_value() {
        let adapter = ResponseProcessorAdapter::new(AppendingProcessor::new("r"));
        let next = Next::new(AppendingProcessor::new("1"));
        let out = adapter.intercept(Event::new("0"), &next).await.unwrap();
        assert_eq!(text(&out), "01r");
    }

    #[tokio::test]
    async fn test_absent_passes_through() {
        let response = AppendingProcessor::new("r");
        let adapter = ResponseProcessorAdapter::new(response.clone());
        let next = Next::new(ReturnAbsent::default());
        let out = adapter.intercept(Event::new("0"), &next).await.unwrap();
        assert!(out.is_absent());
        assert_eq!(response.invocations(), 0);
    }

    #[tokio::test]
    async fn test_response_failure_propagates() {
        let adapter = ResponseProcessorAdapter::new(FailingProcessor::new("bad response"));
        let out = adapter.intercept(Event::new("0"), &Next::end()).await;
        let err = out.unwrap_err();
        assert_eq!(err.to_string(), "processor failed: bad response");
        assert_eq!(err.event().and_then(Event::payload_str), Some("0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_suspended_downstream_answers_through_reply() {
        let response = AppendingProcessor::new("r");
        let adapter = ResponseProcessorAdapter::new(response.clone());
        let next = Next::new(NonBlockingAppender::new("1"));
        let (reply, rx) = ReplyTo::channel();

        let out = adapter
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
        assert_eq!(event.payload_str(), Some("01r"));
        assert_eq!(response.invocations(), 1);
    }
}
