//! Error types for Conveyor.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`ConveyorError`] - Top-level error type for all Conveyor operations
//! - [`MessagingError`] - A failed processing step, carrying the event in flight
//! - [`LifecycleError`] - Invalid lifecycle transitions and start/stop failures
//! - [`SchedulerError`] - Work rejected by a scheduler
//! - [`StoreError`] - Object store failures
//! - [`DigestError`] - A message that cannot be reduced to a digest

use crate::{event::Event, lifecycle::Phase};
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Conveyor operations.
#[derive(Error, Debug)]
pub enum ConveyorError {
    /// A processing step failed.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A lifecycle operation failed.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// A scheduler rejected work.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// An object store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A custom error occurred.
    #[error(transparent)]
    Custom(BoxError),
}

/// What went wrong while processing an event.
#[derive(Error, Debug)]
pub enum MessagingErrorKind {
    /// A processor raised an error.
    #[error("processor failed: {0}")]
    Processor(#[source] BoxError),

    /// Asynchronous processing was requested for an event bound to a transaction.
    #[error("asynchronous processing cannot take part in an active transaction")]
    AsyncTransacted,

    /// Asynchronous processing was requested for a synchronous event.
    #[error("asynchronous processing cannot honour a synchronous event")]
    AsyncSynchronous,

    /// The scheduler refused the work.
    #[error("work was rejected: {0}")]
    Rejected(#[source] SchedulerError),

    /// The message exceeded its redelivery budget and no dead-letter processor is configured.
    #[error("message {digest} exceeded {max} redeliveries")]
    RedeliveryExhausted {
        /// Digest of the redelivered message.
        digest: String,
        /// Configured maximum redelivery count.
        max: u32,
    },

    /// The redelivery store failed.
    #[error("redelivery store failed: {0}")]
    Store(#[source] StoreError),

    /// A processor suspended without having been handed a reply path.
    #[error("processor `{0}` suspended without a reply path")]
    UnexpectedPending(String),
}

/// A failed processing step.
///
/// Carries the cause and, once known, the event that was being processed
/// when the failure happened.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct MessagingError {
    #[source]
    kind: MessagingErrorKind,
    event: Option<Box<Event>>,
}

impl MessagingError {
    /// Create an error of the given kind with no event attached.
    pub fn new(kind: MessagingErrorKind) -> Self {
        Self { kind, event: None }
    }

    /// Wrap an arbitrary processor failure.
    pub fn processor(cause: impl Into<BoxError>) -> Self {
        Self::new(MessagingErrorKind::Processor(cause.into()))
    }

    /// Attach the event being processed.
    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(Box::new(event));
        self
    }

    /// Attach the event only if none is attached yet.
    ///
    /// Nested chains attach the innermost event first; outer layers keep it.
    pub fn or_event(self, event: Event) -> Self {
        if self.event.is_some() {
            self
        } else {
            self.with_event(event)
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> &MessagingErrorKind {
        &self.kind
    }

    /// The event that was in flight, if known.
    pub fn event(&self) -> Option<&Event> {
        self.event.as_deref()
    }

    /// Take the attached event out of the error.
    pub fn take_event(&mut self) -> Option<Event> {
        self.event.take().map(|event| *event)
    }
}

impl From<SchedulerError> for MessagingError {
    fn from(err: SchedulerError) -> Self {
        MessagingError::new(MessagingErrorKind::Rejected(err))
    }
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        MessagingError::new(MessagingErrorKind::Store(err))
    }
}

/// Errors raised by lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The component cannot move from its current phase to the requested one.
    #[error("cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current phase.
        from: Phase,
        /// Requested phase.
        to: Phase,
    },

    /// A component failed while changing phase.
    #[error("{component} failed: {source}")]
    Failed {
        /// Name of the failing component.
        component: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },
}

/// Errors raised when submitting work to a scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The scheduler has been shut down.
    #[error("scheduler `{0}` has been shut down")]
    Shutdown(String),

    /// No runtime is available to run the work.
    #[error("no runtime available: {0}")]
    NoRuntime(String),
}

/// Errors raised by object stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No value is stored under the key.
    #[error("no value stored for key: {0}")]
    NotFound(String),

    /// A value is already stored under the key.
    #[error("value already stored for key: {0}")]
    AlreadyExists(String),

    /// The value could not be (de)serialized.
    #[error("serialization failed for key {key}: {source}")]
    Serialization {
        /// Key being accessed.
        key: String,
        /// Underlying cause.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while computing a message digest.
#[derive(Error, Debug)]
pub enum DigestError {
    /// The payload cannot be serialized for hashing.
    #[error("message payload is not serializable: {0}")]
    NotSerializable(#[source] serde_json::Error),

    /// The attribute used as identifier is missing.
    #[error("message has no `{0}` attribute")]
    MissingAttribute(String),
}

// Convenience conversions
impl From<BoxError> for ConveyorError {
    fn from(err: BoxError) -> Self {
        ConveyorError::Custom(err)
    }
}

impl From<BoxError> for MessagingError {
    fn from(err: BoxError) -> Self {
        MessagingError::processor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_event_keeps_first_event() {
        let inner = Event::new("inner");
        let outer = Event::new("outer");
        let err = MessagingError::processor("boom")
            .or_event(inner)
            .or_event(outer);

        assert_eq!(err.event().and_then(Event::payload_str), Some("inner"));
    }

    #[test]
    fn test_processor_error_display() {
        let err = MessagingError::processor("boom");
        assert_eq!(err.to_string(), "processor failed: boom");
        assert!(matches!(err.kind(), MessagingErrorKind::Processor(_)));
    }
}
