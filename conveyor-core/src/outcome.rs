//! Processing outcomes and conversion into them.

use crate::{
    error::{BoxError, MessagingError},
    event::Event,
};

/// The result of running one processor.
///
/// Four distinct outcomes are possible, and chains treat each differently:
///
/// | variant   | chain behaviour                                               |
/// |-----------|---------------------------------------------------------------|
/// | `Value`   | continue with the returned event                              |
/// | `Void`    | continue with the event that went *into* the step             |
/// | `Absent`  | stop; the chain produces no result                            |
/// | `Pending` | stop walking; the result arrives later through the reply path |
#[derive(Debug, Clone)]
#[must_use]
pub enum Outcome {
    /// A real event.
    Value(Event),
    /// No change; keep going with the pre-step event.
    Void,
    /// Stop the chain without a result.
    Absent,
    /// The result will be delivered asynchronously.
    Pending,
}

/// What every processor returns.
pub type ProcessResult = Result<Outcome, MessagingError>;

impl Outcome {
    /// Whether this is a real event.
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    /// Whether this is the void outcome.
    pub fn is_void(&self) -> bool {
        matches!(self, Outcome::Void)
    }

    /// Whether this is the absent outcome.
    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent)
    }

    /// Whether the result is pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    /// Borrow the event, if any.
    pub fn event(&self) -> Option<&Event> {
        match self {
            Outcome::Value(event) => Some(event),
            _ => None,
        }
    }

    /// Take the event, if any.
    pub fn into_event(self) -> Option<Event> {
        match self {
            Outcome::Value(event) => Some(event),
            _ => None,
        }
    }

    /// Replace `Void` with the event that went into the step.
    pub fn or_previous(self, previous: Event) -> Outcome {
        match self {
            Outcome::Void => Outcome::Value(previous),
            other => other,
        }
    }
}

impl From<Event> for Outcome {
    fn from(event: Event) -> Self {
        Outcome::Value(event)
    }
}

impl From<Option<Event>> for Outcome {
    fn from(event: Option<Event>) -> Self {
        event.map_or(Outcome::Absent, Outcome::Value)
    }
}

/// Conversion of a processing function's output into a [`ProcessResult`].
///
/// # Default Implementations
///
/// - `Event` → `Value`
/// - `Option<Event>` → `Value` or `Absent`
/// - `()` → `Void`
/// - `Outcome` → as is
/// - `Result<T, MessagingError>` / `Result<T, BoxError>` → delegates to `T` or fails
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be turned into a processing outcome",
    label = "missing `IntoOutcome` implementation",
    note = "Return an `Event`, `Option<Event>`, `Outcome`, `()` or a `Result` of those."
)]
pub trait IntoOutcome {
    /// Convert into a processing result.
    fn into_outcome(self) -> ProcessResult;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> ProcessResult {
        Ok(self)
    }
}

impl IntoOutcome for Event {
    fn into_outcome(self) -> ProcessResult {
        Ok(Outcome::Value(self))
    }
}

impl IntoOutcome for Option<Event> {
    fn into_outcome(self) -> ProcessResult {
        Ok(self.into())
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> ProcessResult {
        Ok(Outcome::Void)
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, MessagingError> {
    fn into_outcome(self) -> ProcessResult {
        self.and_then(IntoOutcome::into_outcome)
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, BoxError> {
    fn into_outcome(self) -> ProcessResult {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => Err(MessagingError::processor(err)),
        }
    }
}
