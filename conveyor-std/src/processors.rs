//! Stock processors.

use conveyor_core::{Event, Lifecycle, Outcome, ProcessResult, Processor};

/// A pass-through step that logs every event it sees.
#[derive(Debug, Clone, Default)]
pub struct LoggingProcessor {
    label: Option<String>,
}

impl LoggingProcessor {
    /// Log without a label.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log with `label` so several logging steps can be told apart.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl Lifecycle for LoggingProcessor {}

impl Processor for LoggingProcessor {
    async fn process(&self, event: Event) -> ProcessResult {
        tracing::info!(
            label = self.label.as_deref().unwrap_or("log"),
            event_id = %event.id(),
            correlation_id = event.correlation_id(),
            payload = ?event.payload(),
            "processing event"
        );
        Ok(Outcome::Void)
    }

    fn is_non_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        self.label.as_deref().unwrap_or("log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_event_through() {
        let out = LoggingProcessor::labelled("audit")
            .process(Event::new("0"))
            .await
            .unwrap();
        assert!(out.is_void());
    }
}
