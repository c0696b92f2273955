//! # conveyor - Message Processing Pipelines
//!
//! `conveyor` routes events through chains of processors and interceptors.
//! A chain runs either blocking, awaiting every step on the calling task, or
//! non-blocking, where steps may suspend and the result arrives through the
//! event's reply path.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conveyor::prelude::*;
//!
//! #[conveyor::processor]
//! async fn shout(event: Event) -> Event {
//!     let text = event.payload_str().unwrap_or_default().to_uppercase();
//!     event.with_payload(text)
//! }
//!
//! let flow = Flow::builder("greetings")
//!     .interceptor(IdempotentRedeliveryPolicy::new())
//!     .processor(shout)
//!     .processor(LoggingProcessor::new())
//!     .build()?;
//! flow.initialise()?;
//! flow.start()?;
//!
//! let out = flow.process(Event::new("hello")).await?;
//! ```

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use conveyor_core::{
    // Errors
    BoxError,
    // Processors
    BoxInterceptor,
    BoxProcessor,
    ConveyorError,
    DigestError,
    DynInterceptor,
    DynProcessor,
    // Event model
    Event,
    EventFlags,
    EventId,
    ExceptionHandler,
    ExchangePattern,
    FlowContext,
    FnInterceptor,
    FnProcessor,
    Interceptor,
    IntoOutcome,
    // Lifecycle
    Lifecycle,
    LifecycleError,
    LifecycleState,
    // Collaborators
    LockFactory,
    Message,
    MessagingError,
    MessagingErrorKind,
    NamedLock,
    NamedLockGuard,
    Next,
    ObjectStore,
    // Outcomes
    Outcome,
    Payload,
    Phase,
    ProcessResult,
    Processor,
    Reply,
    ReplyTo,
    Scheduler,
    SchedulerError,
    StoreError,
    Transaction,
    Work,
    async_trait,
    interceptor_fn,
    processor_fn,
};

// Engine
pub use conveyor_std::{
    async_delegate::{AsyncDelegate, AsyncInterceptingProcessor},
    chain::{Chain, ChainBuilder, ProcessorBuilder},
    exception::LoggingExceptionHandler,
    executor::{BlockingExecutor, ExecutionMode, NonBlockingExecutor},
    flow::{Flow, FlowBuilder},
    lock::InMemoryLockFactory,
    processors::LoggingProcessor,
    redelivery::{
        DigestStrategy, IdempotentRedeliveryPolicy, RedeliveryConfig, RedeliveryPolicyBuilder,
    },
    response::ResponseProcessorAdapter,
    scheduler::{SchedulerConfig, TokioScheduler},
    store::{InMemoryObjectStore, SerializingObjectStore},
};

/// Object store implementations.
pub mod store {
    pub use conveyor_std::store::{InMemoryObjectStore, SerializingObjectStore};
}

/// Idempotent redelivery.
pub mod redelivery {
    pub use conveyor_std::redelivery::{
        DigestStrategy, IdempotentRedeliveryPolicy, RedeliveryConfig, RedeliveryPolicyBuilder,
    };
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use conveyor_std::testing::*;
}

/// Prelude module - common imports for Conveyor.
///
/// # Usage
///
/// ```rust,ignore
/// use conveyor::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Engine
        AsyncDelegate,
        AsyncInterceptingProcessor,
        // Errors
        BoxError,
        Chain,
        ChainBuilder,
        // Event model
        Event,
        Flow,
        IdempotentRedeliveryPolicy,
        // Core traits
        Interceptor,
        IntoOutcome,
        Lifecycle,
        LoggingProcessor,
        MessagingError,
        Next,
        Outcome,
        ProcessResult,
        Processor,
        ReplyTo,
        ResponseProcessorAdapter,
    };
}

#[cfg(feature = "macros")]
pub use conveyor_macros::{Lifecycle, interceptor, processor};
