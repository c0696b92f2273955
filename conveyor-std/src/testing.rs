//! Testing utilities for Conveyor.
//!
//! Test doubles share their recorded state between clones, so a test keeps
//! one clone for inspection and hands another to the chain under test.
//!
//! # Features
//!
//! - [`AppendingProcessor`]: appends a token to a text payload and records what it saw
//! - [`AppendingInterceptor`]: appends `before<token>` and `after<token>` around the rest of the chain
//! - [`NonBlockingAppender`]: appends a token on another task and completes through the reply path
//! - [`ReturnAbsent`], [`ReturnVoid`], [`ReturnAbsentInterceptor`], [`ReturnVoidInterceptor`]: sentinel producers
//! - [`FailingProcessor`]: always fails
//! - [`RecordingExceptionHandler`]: records what reached the exception handler
//! - [`LifecycleLog`]: a shared log of lifecycle calls for checking order

use conveyor_core::{
    Event, ExceptionHandler, FlowContext, Interceptor, Lifecycle, LifecycleError, MessagingError,
    Next, Outcome, ProcessResult, Processor, async_trait,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::ThreadId,
    time::Duration,
};

/// The text payload of a `Value` outcome, or an empty string.
pub fn text(outcome: &Outcome) -> String {
    outcome
        .event()
        .and_then(Event::payload_str)
        .unwrap_or_default()
        .to_string()
}

fn append(event: &Event, suffix: &str) -> Event {
    let text = event.payload_str().unwrap_or_default();
    event.with_payload(format!("{text}{suffix}"))
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Lifecycle recording
// ============================================================================

/// A log of lifecycle calls shared between several components.
///
/// Entries look like `"1:start"`.
#[derive(Clone, Default)]
pub struct LifecycleLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl LifecycleLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries for one phase, in call order, without the phase suffix.
    pub fn phase(&self, phase: &str) -> Vec<String> {
        let suffix = format!(":{phase}");
        self.entries()
            .into_iter()
            .filter_map(|entry| entry.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    fn record(&self, label: &str, phase: &str) {
        self.entries.lock().unwrap().push(format!("{label}:{phase}"));
    }
}

#[derive(Clone, Default)]
struct Probe {
    phases: Arc<Mutex<Vec<&'static str>>>,
    flow: Arc<Mutex<Option<String>>>,
    log: Option<LifecycleLog>,
}

impl Probe {
    fn record(&self, label: &str, phase: &'static str) {
        self.phases.lock().unwrap().push(phase);
        if let Some(log) = &self.log {
            log.record(label, phase);
        }
    }

    fn phases(&self) -> Vec<&'static str> {
        self.phases.lock().unwrap().clone()
    }

    fn flow_name(&self) -> Option<String> {
        self.flow.lock().unwrap().clone()
    }

    fn set_flow(&self, label: &str, flow: &FlowContext) {
        *self.flow.lock().unwrap() = Some(flow.name().to_string());
        self.record(label, "set_flow");
    }
}

macro_rules! probed_lifecycle {
    ($ty:ty) => {
        impl Lifecycle for $ty {
            fn set_flow(&self, flow: &FlowContext) {
                self.probe.set_flow(&self.token, flow);
            }

            fn initialise(&self) -> Result<(), LifecycleError> {
                self.probe.record(&self.token, "initialise");
                Ok(())
            }

            fn start(&self) -> Result<(), LifecycleError> {
                self.probe.record(&self.token, "start");
                Ok(())
            }

            fn stop(&self) -> Result<(), LifecycleError> {
                self.probe.record(&self.token, "stop");
                Ok(())
            }

            fn dispose(&self) {
                self.probe.record(&self.token, "dispose");
            }
        }
    };
}

// ============================================================================
// Appending Processor
// ============================================================================

#[derive(Default)]
struct Sensed {
    input: Mutex<Option<Event>>,
    output: Mutex<Option<Event>>,
    thread: Mutex<Option<ThreadId>>,
    invocations: AtomicUsize,
}

impl Sensed {
    fn record_input(&self, event: &Event) {
        *self.input.lock().unwrap() = Some(event.clone());
        *self.thread.lock().unwrap() = Some(std::thread::current().id());
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    fn record_output(&self, event: &Event) {
        *self.output.lock().unwrap() = Some(event.clone());
    }
}

/// Appends a token to the text payload.
///
/// # Example
///
/// ```rust,ignore
/// let tail = AppendingProcessor::new("3");
/// let chain = ChainBuilder::new().processor(tail.clone()).build();
/// chain.process(Event::new("0")).await?;
/// assert_eq!(tail.result().unwrap().payload_str(), Some("03"));
/// ```
#[derive(Clone)]
pub struct AppendingProcessor {
    token: Arc<str>,
    stop: bool,
    sensed: Arc<Sensed>,
    probe: Probe,
}

impl AppendingProcessor {
    /// Append `token`.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            stop: false,
            sensed: Arc::default(),
            probe: Probe::default(),
        }
    }

    /// Also set the stop-processing flag on the result.
    pub fn stopping(mut self) -> Self {
        self.stop = true;
        self
    }

    /// Record lifecycle calls into `log` as well.
    pub fn with_log(mut self, log: &LifecycleLog) -> Self {
        self.probe.log = Some(log.clone());
        self
    }

    /// The last event this processor received.
    pub fn sensed(&self) -> Option<Event> {
        self.sensed.input.lock().unwrap().clone()
    }

    /// The last event this processor returned.
    pub fn result(&self) -> Option<Event> {
        self.sensed.output.lock().unwrap().clone()
    }

    /// The thread of the last invocation.
    pub fn thread(&self) -> Option<ThreadId> {
        *self.sensed.thread.lock().unwrap()
    }

    /// Number of invocations.
    pub fn invocations(&self) -> usize {
        self.sensed.invocations.load(Ordering::SeqCst)
    }

    /// Lifecycle calls received, in order.
    pub fn phases(&self) -> Vec<&'static str> {
        self.probe.phases()
    }

    /// Name of the flow injected through `set_flow`.
    pub fn flow_name(&self) -> Option<String> {
        self.probe.flow_name()
    }
}

probed_lifecycle!(AppendingProcessor);

impl Processor for AppendingProcessor {
    async fn process(&self, event: Event) -> ProcessResult {
        self.sensed.record_input(&event);
        let mut result = append(&event, &self.token);
        if self.stop {
            result.set_stop_processing(true);
        }
        self.sensed.record_output(&result);
        Ok(Outcome::Value(result))
    }

    fn name(&self) -> &str {
        &self.token
    }
}

// ============================================================================
// Appending Interceptor
// ============================================================================

/// Appends `before<token>`, runs the rest of the chain, then appends
/// `after<token>`. A stopping interceptor returns its input untouched and
/// never calls the rest of the chain.
#[derive(Clone)]
pub struct AppendingInterceptor {
    token: Arc<str>,
    stop: bool,
    sensed: Arc<Sensed>,
    probe: Probe,
}

impl AppendingInterceptor {
    /// Wrap with `token`.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            stop: false,
            sensed: Arc::default(),
            probe: Probe::default(),
        }
    }

    /// Do not continue the chain.
    pub fn stopping(mut self) -> Self {
        self.stop = true;
        self
    }

    /// Record lifecycle calls into `log` as well.
    pub fn with_log(mut self, log: &LifecycleLog) -> Self {
        self.probe.log = Some(log.clone());
        self
    }

    /// Whether this interceptor has run.
    pub fn invoked(&self) -> bool {
        self.sensed.invocations.load(Ordering::SeqCst) > 0
    }

    /// Lifecycle calls received, in order.
    pub fn phases(&self) -> Vec<&'static str> {
        self.probe.phases()
    }

    /// Name of the flow injected through `set_flow`.
    pub fn flow_name(&self) -> Option<String> {
        self.probe.flow_name()
    }
}

probed_lifecycle!(AppendingInterceptor);

impl Interceptor for AppendingInterceptor {
    async fn intercept(&self, event: Event, next: &Next) -> ProcessResult {
        self.sensed.record_input(&event);
        if self.stop {
            return Ok(Outcome::Value(event));
        }
        let before = append(&event, &format!("before{}", self.token));
        match next.process(before.clone()).await?.or_previous(before) {
            Outcome::Value(after) => Ok(Outcome::Value(append(
                &after,
                &format!("after{}", self.token),
            ))),
            other => Ok(other),
        }
    }

    fn name(&self) -> &str {
        &self.token
    }
}

// ============================================================================
// Non-blocking Appender
// ============================================================================

/// Appends a token. Given a reply path on an event that allows it, the work
/// happens on a spawned task and the result goes through the reply path.
#[derive(Clone)]
pub struct NonBlockingAppender {
    token: Arc<str>,
    sensed: Arc<Sensed>,
}

impl NonBlockingAppender {
    /// Append `token`.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
            sensed: Arc::default(),
        }
    }

    /// Number of invocations.
    pub fn invocations(&self) -> usize {
        self.sensed.invocations.load(Ordering::SeqCst)
    }

    /// The thread that did the last append.
    pub fn thread(&self) -> Option<ThreadId> {
        *self.sensed.thread.lock().unwrap()
    }
}

impl Lifecycle for NonBlockingAppender {}

impl Processor for NonBlockingAppender {
    async fn process(&self, mut event: Event) -> ProcessResult {
        let reply = if event.allows_non_blocking() {
            event.take_reply_to()
        } else {
            None
        };
        let Some(reply) = reply else {
            self.sensed.record_input(&event);
            return Ok(Outcome::Value(append(&event, &self.token)));
        };

        let token = self.token.clone();
        let sensed = self.sensed.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            sensed.record_input(&event);
            reply.complete(append(&event, &token));
        });
        Ok(Outcome::Pending)
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.token
    }
}

// ============================================================================
// Sentinel producers
// ============================================================================

/// Returns `Absent` and records what it saw.
#[derive(Clone, Default)]
pub struct ReturnAbsent {
    sensed: Arc<Sensed>,
}

impl ReturnAbsent {
    /// The last event received.
    pub fn sensed(&self) -> Option<Event> {
        self.sensed.input.lock().unwrap().clone()
    }
}

impl Lifecycle for ReturnAbsent {}

impl Processor for ReturnAbsent {
    async fn process(&self, event: Event) -> ProcessResult {
        self.sensed.record_input(&event);
        Ok(Outcome::Absent)
    }
}

/// Returns `Void` and records what it saw.
#[derive(Clone, Default)]
pub struct ReturnVoid {
    sensed: Arc<Sensed>,
}

impl ReturnVoid {
    /// The last event received.
    pub fn sensed(&self) -> Option<Event> {
        self.sensed.input.lock().unwrap().clone()
    }
}

impl Lifecycle for ReturnVoid {}

impl Processor for ReturnVoid {
    async fn process(&self, event: Event) -> ProcessResult {
        self.sensed.record_input(&event);
        Ok(Outcome::Void)
    }
}

/// An interceptor that ends the chain with `Absent`.
#[derive(Clone, Copy, Default)]
pub struct ReturnAbsentInterceptor;

impl Lifecycle for ReturnAbsentInterceptor {}

impl Interceptor for ReturnAbsentInterceptor {
    async fn intercept(&self, _event: Event, _next: &Next) -> ProcessResult {
        Ok(Outcome::Absent)
    }
}

/// An interceptor that ends the chain with `Void`.
#[derive(Clone, Copy, Default)]
pub struct ReturnVoidInterceptor;

impl Lifecycle for ReturnVoidInterceptor {}

impl Interceptor for ReturnVoidInterceptor {
    async fn intercept(&self, _event: Event, _next: &Next) -> ProcessResult {
        Ok(Outcome::Void)
    }
}

// ============================================================================
// Failing Processor
// ============================================================================

/// Always fails with the configured message.
#[derive(Clone)]
pub struct FailingProcessor {
    message: Arc<str>,
    invocations: Arc<AtomicUsize>,
}

impl FailingProcessor {
    /// Fail with `message`.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            invocations: Arc::default(),
        }
    }

    /// Number of invocations.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Lifecycle for FailingProcessor {}

impl Processor for FailingProcessor {
    async fn process(&self, event: Event) -> ProcessResult {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(MessagingError::processor(self.message.to_string()).with_event(event))
    }
}

// ============================================================================
// Recording Exception Handler
// ============================================================================

/// Records every failure it is handed.
#[derive(Clone, Default)]
pub struct RecordingExceptionHandler {
    handled: Arc<Mutex<Vec<(String, Event)>>>,
}

impl RecordingExceptionHandler {
    /// Create a new handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(error message, event)` pairs.
    pub fn handled(&self) -> Vec<(String, Event)> {
        self.handled.lock().unwrap().clone()
    }

    /// Number of recorded failures.
    pub fn count(&self) -> usize {
        self.handled.lock().unwrap().len()
    }
}

#[async_trait]
impl ExceptionHandler for RecordingExceptionHandler {
    async fn handle(&self, error: &MessagingError, event: Event) -> Event {
        self.handled
            .lock()
            .unwrap()
            .push((error.to_string(), event.clone()));
        event
    }
}
