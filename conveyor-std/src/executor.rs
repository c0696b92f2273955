//! # Executors
//!
//! Executors walk the flat list of steps a [`Chain`](crate::chain::Chain)
//! resolved at build time. Interceptors never appear as separate entries:
//! each one is bound to its own continuation and shows up as a single step.
//!
//! - [`BlockingExecutor`] awaits every step in order and returns the result.
//! - [`NonBlockingExecutor`] detaches the walk onto a [`Scheduler`], returns
//!   [`Outcome::Pending`] at once and delivers the result through the event's
//!   [`ReplyTo`]. Steps that cannot suspend make it fall back to a blocking
//!   walk for the rest of the list.

use conveyor_core::{
    BoxProcessor, Event, MessagingError, MessagingErrorKind, Outcome, ProcessResult, Processor,
    Reply, ReplyTo, Scheduler,
};
use futures::future::BoxFuture;
use std::sync::Arc;

/// How a chain runs a given event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Await each step on the calling task.
    Blocking,
    /// Suspend where possible and complete through the reply path.
    NonBlocking,
}

impl ExecutionMode {
    /// Non-blocking when the event allows it and carries a reply path.
    pub fn for_event(event: &Event) -> Self {
        if event.allows_non_blocking() && event.reply_to().is_some() {
            ExecutionMode::NonBlocking
        } else {
            ExecutionMode::Blocking
        }
    }
}

enum Advance {
    Continue(Event),
    Halt(ProcessResult),
}

fn advance(result: ProcessResult, previous: Event) -> Advance {
    match result {
        Ok(Outcome::Value(event)) => Advance::Continue(event),
        Ok(Outcome::Void) => Advance::Continue(previous),
        Ok(outcome) => Advance::Halt(Ok(outcome)),
        Err(err) => Advance::Halt(Err(err.or_event(previous))),
    }
}

/// Runs steps one after another on the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingExecutor;

impl BlockingExecutor {
    /// Walk `steps` with `event`.
    ///
    /// For a one-way exchange that allows non-blocking processing the caller
    /// gets its own request back once every step has run.
    pub async fn execute(&self, steps: &[BoxProcessor], event: Event) -> ProcessResult {
        let echo = (event.exchange_pattern().is_one_way() && event.allows_non_blocking())
            .then(|| event.clone());

        let mut current = event;
        for step in steps {
            if current.is_stop_processing() {
                tracing::trace!(event_id = %current.id(), "processing stopped");
                break;
            }
            tracing::trace!(step = step.name(), event_id = %current.id(), "processing step");
            let previous = current.clone();
            match advance(step.process(current).await, previous) {
                Advance::Continue(event) => current = event,
                Advance::Halt(result) => return result,
            }
        }
        Ok(Outcome::Value(echo.unwrap_or(current)))
    }
}

/// Runs steps on a scheduler and completes through the reply path.
#[derive(Clone)]
pub struct NonBlockingExecutor {
    scheduler: Arc<dyn Scheduler>,
}

impl NonBlockingExecutor {
    /// Detach walks onto `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Walk `steps` with `event`.
    ///
    /// Returns [`Outcome::Pending`]; the result reaches the event's reply
    /// path exactly once. Without a reply path this is a blocking walk.
    pub async fn execute(&self, steps: Arc<[BoxProcessor]>, mut event: Event) -> ProcessResult {
        let Some(reply) = event.take_reply_to() else {
            return BlockingExecutor.execute(&steps, event).await;
        };
        let walk = Walk {
            steps,
            reply: reply.clone(),
            scheduler: self.scheduler.clone(),
        };
        let rejected = event.clone();
        match self.scheduler.submit(walk.run(0, event)) {
            Ok(()) => Ok(Outcome::Pending),
            Err(err) => {
                reply.disarm();
                Err(MessagingError::from(err).with_event(rejected))
            }
        }
    }
}

impl std::fmt::Debug for NonBlockingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingExecutor")
            .field("scheduler", &self.scheduler.name())
            .finish()
    }
}

/// One detached walk. The event it carries never holds a reply path; each
/// step that can suspend is handed a continuation instead.
#[derive(Clone)]
struct Walk {
    steps: Arc<[BoxProcessor]>,
    reply: ReplyTo,
    scheduler: Arc<dyn Scheduler>,
}

impl Walk {
    fn run(self, mut index: usize, event: Event) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut current = event;
            while let Some(step) = self.steps.get(index).cloned() {
                if current.is_stop_processing() {
                    break;
                }
                if !step.is_non_blocking() {
                    tracing::debug!(
                        step = step.name(),
                        event_id = %current.id(),
                        "step cannot suspend, finishing blocking"
                    );
                    self.finish_blocking(index, current).await;
                    return;
                }

                tracing::trace!(step = step.name(), event_id = %current.id(), "processing step");
                let previous = current.clone();
                let continuation = self.continuation(index + 1, previous.clone());
                let result = step
                    .process(current.with_reply_to(continuation.clone()))
                    .await;
                // A suspended step still owns the continuation.
                if matches!(result, Ok(Outcome::Pending)) {
                    return;
                }
                // A failed step may have disarmed the continuation itself, so
                // only a successful one counts as having gone through it.
                let used = !continuation.disarm();
                if used && result.is_ok() {
                    return;
                }
                match advance(result, previous) {
                    Advance::Continue(event) => current = event.without_reply_to(),
                    Advance::Halt(result) => {
                        self.finish(result);
                        return;
                    }
                }
                index += 1;
            }
            self.finish(Ok(Outcome::Value(current)));
        })
    }

    async fn finish_blocking(&self, from: usize, event: Event) {
        let mut current = event;
        for step in &self.steps[from..] {
            if current.is_stop_processing() {
                break;
            }
            let previous = current.clone();
            match advance(step.process(current).await, previous.clone()) {
                Advance::Continue(event) => current = event,
                Advance::Halt(Ok(Outcome::Pending)) => {
                    let kind = MessagingErrorKind::UnexpectedPending(step.name().to_string());
                    self.reply
                        .fail(MessagingError::new(kind).with_event(previous));
                    return;
                }
                Advance::Halt(result) => {
                    self.finish(result);
                    return;
                }
            }
        }
        self.finish(Ok(Outcome::Value(current)));
    }

    fn finish(&self, result: ProcessResult) {
        let reply = match result {
            Ok(Outcome::Value(event)) => Ok(Some(event.without_reply_to())),
            Ok(Outcome::Void | Outcome::Absent | Outcome::Pending) => Ok(None),
            Err(err) => Err(err),
        };
        self.reply.reply(reply);
    }

    /// A reply path that resumes this walk at `index`.
    fn continuation(&self, index: usize, previous: Event) -> ReplyTo {
        let walk = self.clone();
        ReplyTo::new(move |reply: Reply| match reply {
            Ok(Some(event)) => walk.resume(index, event.without_reply_to()),
            Ok(None) => {
                walk.reply.complete_empty();
            }
            Err(err) => {
                walk.reply.fail(err.or_event(previous));
            }
        })
    }

    fn resume(self, index: usize, event: Event) {
        let reply = self.reply.clone();
        let scheduler = self.scheduler.clone();
        if let Err(err) = scheduler.submit(self.run(index, event)) {
            reply.fail(MessagingError::from(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scheduler::TokioScheduler,
        testing::{AppendingProcessor, NonBlockingAppender, ReturnAbsent, ReturnVoid, text},
    };
    use conveyor_core::{Processor, Transaction};
    use std::time::Duration;

    fn steps(list: Vec<BoxProcessor>) -> Arc<[BoxProcessor]> {
        list.into()
    }

    #[test]
    fn test_mode_selection() {
        let (reply, _rx) = ReplyTo::channel();
        let plain = Event::new("x");
        assert_eq!(ExecutionMode::for_event(&plain), ExecutionMode::Blocking);

        let with_reply = plain.clone().with_reply_to(reply.clone());
        assert_eq!(ExecutionMode::for_event(&with_reply), ExecutionMode::NonBlocking);

        let sync = with_reply.clone().synchronous(true);
        assert_eq!(ExecutionMode::for_event(&sync), ExecutionMode::Blocking);

        let transacted = with_reply.with_transaction(Transaction::begin());
        assert_eq!(ExecutionMode::for_event(&transacted), ExecutionMode::Blocking);
        reply.disarm();
    }

    #[tokio::test]
    async fn test_blocking_void_and_absent() {
        let list = steps(vec![
            AppendingProcessor::new("1").boxed(),
            ReturnVoid::default().boxed(),
            AppendingProcessor::new("2").boxed(),
        ]);
        let out = BlockingExecutor.execute(&list, Event::new("0")).await.unwrap();
        assert_eq!(text(&out), "012");

        let tail = AppendingProcessor::new("3");
        let list = steps(vec![
            AppendingProcessor::new("1").boxed(),
            ReturnAbsent::default().boxed(),
            tail.clone().boxed(),
        ]);
        let out = BlockingExecutor.execute(&list, Event::new("0")).await.unwrap();
        assert!(out.is_absent());
        assert!(tail.sensed().is_none());
    }

    #[tokio::test]
    async fn test_blocking_one_way_echoes_request() {
        let list = steps(vec![AppendingProcessor::new("1").boxed()]);
        let request = Event::new("0").one_way();
        let out = BlockingExecutor.execute(&list, request).await.unwrap();
        assert_eq!(text(&out), "0");
    }

    #[tokio::test]
    async fn test_blocking_stop_processing() {
        let tail = AppendingProcessor::new("2");
        let list = steps(vec![
            AppendingProcessor::new("1").stopping().boxed(),
            tail.clone().boxed(),
        ]);
        let out = BlockingExecutor.execute(&list, Event::new("0")).await.unwrap();
        assert_eq!(text(&out), "01");
        assert!(tail.sensed().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_non_blocking_completes_reply() {
        let scheduler = Arc::new(TokioScheduler::current().unwrap());
        let executor = NonBlockingExecutor::new(scheduler);
        let list = steps(vec![
            NonBlockingAppender::new("1").boxed(),
            AppendingProcessor::new("2").boxed(),
            NonBlockingAppender::new("3").boxed(),
        ]);

        let (reply, rx) = ReplyTo::channel();
        let out = executor
            .execute(list, Event::new("0").with_reply_to(reply))
            .await
            .unwrap();
        assert!(out.is_pending());

        let result = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(result.payload_str(), Some("0123"));
        assert!(result.reply_to().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_non_blocking_without_reply_blocks() {
        let scheduler = Arc::new(TokioScheduler::current().unwrap());
        let executor = NonBlockingExecutor::new(scheduler);
        let list = steps(vec![NonBlockingAppender::new("1").boxed()]);
        let out = executor.execute(list, Event::new("0")).await.unwrap();
        assert_eq!(text(&out), "01");
    }

    #[tokio::test]
    async fn test_non_blocking_rejected_submission() {
        let scheduler = TokioScheduler::current().unwrap();
        scheduler.shutdown();
        let executor = NonBlockingExecutor::new(Arc::new(scheduler));
        let (reply, mut rx) = ReplyTo::channel();
        let err = executor
            .execute(steps(vec![]), Event::new("0").with_reply_to(reply))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), MessagingErrorKind::Rejected(_)));
        assert_eq!(err.event().and_then(Event::payload_str), Some("0"));
        // The reply path is never completed when the caller got the error.
        assert!(matches!(rx.try_recv(), Err(_) | Ok(None)));
    }
}
