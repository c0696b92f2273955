//! Logging exception handler.

use conveyor_core::{Event, ExceptionHandler, FlowContext, MessagingError, async_trait};
use std::sync::Arc;

/// Logs the failure and hands back the event unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

#[async_trait]
impl ExceptionHandler for LoggingExceptionHandler {
    async fn handle(&self, error: &MessagingError, event: Event) -> Event {
        tracing::error!(
            event_id = %event.id(),
            correlation_id = event.correlation_id(),
            %error,
            "message processing failed"
        );
        event
    }
}

/// The handler a component should use: its own, else its flow's, else
/// [`LoggingExceptionHandler`].
pub(crate) fn resolve(
    explicit: Option<&Arc<dyn ExceptionHandler>>,
    flow: Option<&FlowContext>,
) -> Arc<dyn ExceptionHandler> {
    explicit
        .or_else(|| flow.map(FlowContext::exception_handler))
        .cloned()
        .unwrap_or_else(|| Arc::new(LoggingExceptionHandler))
}
