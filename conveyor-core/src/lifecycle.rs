//! Component lifecycle.
//!
//! Every processor and interceptor takes part in the lifecycle of the flow
//! that owns it. All methods default to no-ops so that stateless processors
//! only need an empty `impl Lifecycle for X {}` (or `#[derive(Lifecycle)]`).
//!
//! Containers propagate `set_flow`, `initialise` and `start` in construction
//! order and `stop` and `dispose` in reverse order.

use crate::{context::FlowContext, error::LifecycleError};
use std::sync::{Mutex, PoisonError};

/// Lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, nothing called yet.
    Created,
    /// `initialise` completed.
    Initialised,
    /// `start` completed.
    Started,
    /// `stop` completed.
    Stopped,
    /// `dispose` completed.
    Disposed,
}

/// Lifecycle callbacks.
pub trait Lifecycle {
    /// Inject the owning flow's context.
    fn set_flow(&self, _flow: &FlowContext) {}

    /// Prepare resources.
    fn initialise(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Begin accepting work.
    fn start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Stop accepting work.
    fn stop(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Release resources.
    fn dispose(&self) {}
}

/// Guards phase changes of a container so each phase is entered once.
#[derive(Debug)]
pub struct LifecycleState {
    phase: Mutex<Phase>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleState {
    /// A state in [`Phase::Created`].
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Created),
        }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to`, returning the previous phase.
    pub fn transition(&self, to: Phase) -> Result<Phase, LifecycleError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *phase;
        let allowed = match to {
            Phase::Created => false,
            Phase::Initialised => from == Phase::Created,
            Phase::Started => matches!(from, Phase::Initialised | Phase::Stopped),
            Phase::Stopped => from == Phase::Started,
            Phase::Disposed => from != Phase::Disposed,
        };
        if !allowed {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        *phase = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let state = LifecycleState::new();
        state.transition(Phase::Initialised).unwrap();
        state.transition(Phase::Started).unwrap();
        state.transition(Phase::Stopped).unwrap();
        state.transition(Phase::Started).unwrap();
        state.transition(Phase::Stopped).unwrap();
        state.transition(Phase::Disposed).unwrap();
        assert_eq!(state.phase(), Phase::Disposed);
    }

    #[test]
    fn test_rejects_double_initialise() {
        let state = LifecycleState::new();
        state.transition(Phase::Initialised).unwrap();
        let err = state.transition(Phase::Initialised).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: Phase::Initialised,
                to: Phase::Initialised
            }
        ));
    }

    #[test]
    fn test_start_requires_initialise() {
        let state = LifecycleState::new();
        assert!(state.transition(Phase::Started).is_err());
        assert_eq!(state.phase(), Phase::Created);
    }
}
