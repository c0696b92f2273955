//! # conveyor-core
//!
//! Core traits and the event model of the Conveyor message processing
//! engine.
//!
//! This crate has minimal dependencies and is meant to be imported by
//! components that plug into a flow without needing the executors and stock
//! implementations of `conveyor-std`.
//!
//! # Building blocks
//!
//! ## Events ([`Event`])
//!
//! An immutable-by-convention message envelope: payload and attributes,
//! exchange pattern, synchronous flag, optional transaction and an optional
//! [`ReplyTo`] through which a non-blocking result is delivered.
//!
//! ## Processors ([`Processor`])
//!
//! The unit of work. Returns an [`Outcome`]: a new event, *void* (keep the
//! previous event), *absent* (stop with no result) or *pending* (the result
//! arrives later through the reply path).
//!
//! ## Interceptors ([`Interceptor`])
//!
//! Around advice. Receives the event and a [`Next`] continuation standing for
//! the rest of the chain.
//!
//! ## Collaborators
//!
//! - [`Scheduler`] runs deferred work
//! - [`ExceptionHandler`] receives failures nobody else can see
//! - [`ObjectStore`] and [`LockFactory`] back the idempotent redelivery policy
//! - [`FlowContext`] bundles what a flow hands to its components
//!
//! # Error Types
//!
//! - [`ConveyorError`] - Top-level error type
//! - [`MessagingError`] - A failure while processing an event
//! - [`LifecycleError`] - Lifecycle transition failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod context;
mod error;
mod event;
mod exception;
mod interceptor;
mod lifecycle;
mod lock;
mod outcome;
mod processor;
mod reply;
mod scheduler;
mod store;

// Re-exports
pub use context::FlowContext;
pub use error::{
    BoxError, ConveyorError, DigestError, LifecycleError, MessagingError, MessagingErrorKind,
    SchedulerError, StoreError,
};
pub use event::{Event, EventFlags, EventId, ExchangePattern, Message, Payload, Transaction};
pub use exception::ExceptionHandler;
pub use interceptor::{
    BoxInterceptor, DynInterceptor, FnInterceptor, Interceptor, Next, interceptor_fn,
};
pub use lifecycle::{Lifecycle, LifecycleState, Phase};
pub use lock::{LockFactory, NamedLock, NamedLockGuard};
pub use outcome::{IntoOutcome, Outcome, ProcessResult};
pub use processor::{BoxProcessor, DynProcessor, FnProcessor, Processor, processor_fn};
pub use reply::{Reply, ReplyTo};
pub use scheduler::{Scheduler, Work};
pub use store::ObjectStore;

/// Re-exported so that derived code and downstream implementations of the
/// object-safe traits agree on the macro version.
pub use async_trait::async_trait;
