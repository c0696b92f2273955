//! Exception handling contract.

use crate::{error::MessagingError, event::Event};
use async_trait::async_trait;

/// Receives failures that happen outside the caller's reach.
///
/// Invoked once per failure on asynchronous and non-blocking paths. The
/// returned event may be a substitute for the one that failed.
#[async_trait]
pub trait ExceptionHandler: Send + Sync + 'static {
    /// Handle a failure of `event`.
    async fn handle(&self, error: &MessagingError, event: Event) -> Event;
}
