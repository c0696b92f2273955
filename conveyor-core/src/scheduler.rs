//! Scheduler contract.

use crate::error::SchedulerError;
use futures::future::BoxFuture;

/// A unit of deferred work.
pub type Work = BoxFuture<'static, ()>;

/// Runs work later, on a pooled thread.
///
/// Submission either accepts the work (it will run to completion) or rejects
/// it immediately. There is no cancellation once accepted.
pub trait Scheduler: Send + Sync + 'static {
    /// Accept a unit of work.
    fn submit(&self, work: Work) -> Result<(), SchedulerError>;

    /// A name for diagnostics.
    fn name(&self) -> &str;
}
