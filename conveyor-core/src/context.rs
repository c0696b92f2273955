//! # Flow Context
//!
//! The explicit execution context handed to every component of a flow
//! through [`Lifecycle::set_flow`]. It replaces ambient, thread-bound state:
//! whatever a processor needs from its owning flow (where to run deferred
//! work, who handles failures nobody else can see) arrives here.
//!
//! [`Lifecycle::set_flow`]: crate::Lifecycle::set_flow

use crate::{exception::ExceptionHandler, scheduler::Scheduler};
use std::{fmt, sync::Arc};

/// Collaborators shared by the components of one flow.
#[derive(Clone)]
pub struct FlowContext {
    name: Arc<str>,
    scheduler: Arc<dyn Scheduler>,
    exception_handler: Arc<dyn ExceptionHandler>,
}

impl FlowContext {
    /// Create a context.
    pub fn new(
        name: impl Into<Arc<str>>,
        scheduler: Arc<dyn Scheduler>,
        exception_handler: Arc<dyn ExceptionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            scheduler,
            exception_handler,
        }
    }

    /// The flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where deferred work runs.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Who handles failures that cannot reach the caller.
    pub fn exception_handler(&self) -> &Arc<dyn ExceptionHandler> {
        &self.exception_handler
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("name", &self.name)
            .field("scheduler", &self.scheduler.name())
            .finish_non_exhaustive()
    }
}
