use conveyor::{
    AsyncDelegate, AsyncInterceptingProcessor, ChainBuilder, Event, Flow, MessagingErrorKind,
    Processor, ReplyTo, Scheduler, TokioScheduler, Transaction,
    testing::{AppendingProcessor, RecordingExceptionHandler, eventually, text},
};
use std::{sync::Arc, time::Duration};

mod common;
use common::{init_tracing, recv};

#[test]
fn test_delegate_processes_a_copy_on_another_thread() {
    init_tracing();
    let workers = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let caller = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(workers.handle().clone()));
    let listener = AppendingProcessor::new("1");
    let delegate = AsyncDelegate::new(listener.clone()).with_scheduler(scheduler);
    let request = Event::new("0");

    let out = caller
        .block_on(delegate.process(request.clone()))
        .unwrap();
    assert!(out.is_void());
    assert!(caller.block_on(eventually(|| listener.invocations() == 1)));

    let sensed = listener.sensed().unwrap();
    assert_eq!(sensed.id(), request.id());
    assert_eq!(sensed.payload_str(), Some("0"));
    assert_ne!(listener.thread(), Some(std::thread::current().id()));
    assert_eq!(request.payload_str(), Some("0"));

    drop(caller);
    drop(workers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delegate_in_chain_does_not_hold_up_the_chain() {
    init_tracing();
    let listener = AppendingProcessor::new("async");
    let chain = ChainBuilder::new()
        .processor(AppendingProcessor::new("1"))
        .processor(AsyncDelegate::new(listener.clone()))
        .processor(AppendingProcessor::new("2"))
        .build();

    let out = chain.process(Event::new("0")).await.unwrap();
    assert_eq!(text(&out), "012");
    assert!(eventually(|| listener.invocations() == 1).await);
    assert_eq!(listener.result().unwrap().payload_str(), Some("01async"));
}

#[tokio::test]
async fn test_delegate_rejects_before_scheduling() {
    init_tracing();
    let listener = AppendingProcessor::new("1");
    let delegate = AsyncDelegate::new(listener.clone());

    let err = delegate
        .process(Event::new("0").with_transaction(Transaction::begin()))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), MessagingErrorKind::AsyncTransacted));

    let committed = Transaction::begin();
    committed.commit();
    let out = delegate
        .process(Event::new("0").with_transaction(committed))
        .await
        .unwrap();
    assert!(out.is_void());
    assert!(eventually(|| listener.invocations() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_step_hands_rest_of_chain_to_scheduler() {
    init_tracing();
    let tail = AppendingProcessor::new("2");
    let chain = ChainBuilder::new()
        .processor(AppendingProcessor::new("1"))
        .interceptor(AsyncInterceptingProcessor::new())
        .processor(tail.clone())
        .build();
    let (reply, rx) = ReplyTo::channel();

    let out = chain
        .process(Event::new("0").with_reply_to(reply))
        .await
        .unwrap();
    assert!(out.is_pending());

    // The blocking first step finishes the walk, so the async step detaches
    // the tail and the chain answers with what it had.
    let answered = recv(rx).await.unwrap().unwrap();
    assert_eq!(answered.payload_str(), Some("01"));
    assert!(eventually(|| tail.invocations() == 1).await);
    assert_eq!(tail.result().unwrap().payload_str(), Some("012"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_step_first_delivers_tail_result() {
    init_tracing();
    let tail = AppendingProcessor::new("1");
    let chain = ChainBuilder::new()
        .interceptor(AsyncInterceptingProcessor::new())
        .processor(tail.clone())
        .build();
    let (reply, rx) = ReplyTo::channel();

    let out = chain
        .process(Event::new("0").with_reply_to(reply))
        .await
        .unwrap();
    assert!(out.is_pending());
    assert_eq!(recv(rx).await.unwrap().unwrap().payload_str(), Some("01"));
    assert_eq!(tail.invocations(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_step_without_reply_returns_void() {
    init_tracing();
    let tail = AppendingProcessor::new("1");
    let chain = ChainBuilder::new()
        .interceptor(AsyncInterceptingProcessor::new())
        .processor(tail.clone())
        .build();

    let out = chain.process(Event::new("0")).await.unwrap();
    assert_eq!(text(&out), "0");
    assert!(eventually(|| tail.invocations() == 1).await);
}

#[tokio::test]
async fn test_async_step_rejects_synchronous_event() {
    init_tracing();
    let tail = AppendingProcessor::new("1");
    let chain = ChainBuilder::new()
        .interceptor(AsyncInterceptingProcessor::new())
        .processor(tail.clone())
        .build();

    let err = chain
        .process(Event::new("0").synchronous(true))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), MessagingErrorKind::AsyncSynchronous));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tail.invocations(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_failure_in_flow_is_handled_once() {
    init_tracing();
    let handler = RecordingExceptionHandler::new();
    let flow = Flow::builder("async")
        .exception_handler(Arc::new(handler.clone()))
        .interceptor(AsyncInterceptingProcessor::new())
        .processor(conveyor::testing::FailingProcessor::new("boom"))
        .build()
        .unwrap();
    let (reply, rx) = ReplyTo::channel();

    let out = flow
        .process(Event::new("0").with_reply_to(reply))
        .await
        .unwrap();
    assert!(out.is_pending());
    let err = recv(rx).await.unwrap_err();
    assert_eq!(err.to_string(), "processor failed: boom");
    assert_eq!(handler.count(), 1);
}
