//! Tokio-backed scheduler.

use conveyor_core::{FlowContext, Scheduler, SchedulerError, Work};
use serde::Deserialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{runtime::Handle, sync::Semaphore};

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name used in diagnostics and rejection errors.
    pub name: String,
    /// Upper bound on units of work running at once. `None` means unbounded.
    pub max_concurrency: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "conveyor".to_string(),
            max_concurrency: None,
        }
    }
}

/// Runs work as tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    shutdown: AtomicBool,
}

impl TokioScheduler {
    /// Schedule onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self::with_config(handle, SchedulerConfig::default())
    }

    /// Schedule onto the runtime the caller is running in.
    pub fn current() -> Result<Self, SchedulerError> {
        Self::from_config(SchedulerConfig::default())
    }

    /// Schedule onto the current runtime with the given settings.
    pub fn from_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let handle = Handle::try_current()
            .map_err(|err| SchedulerError::NoRuntime(err.to_string()))?;
        Ok(Self::with_config(handle, config))
    }

    /// Schedule onto the given runtime with the given settings.
    pub fn with_config(handle: Handle, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: config.name,
                handle,
                permits: config
                    .max_concurrency
                    .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Refuse further work. Work already accepted still runs.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!(scheduler = %self.inner.name, "scheduler shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl Scheduler for TokioScheduler {
    fn submit(&self, work: Work) -> Result<(), SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown(self.inner.name.clone()));
        }
        match &self.inner.permits {
            Some(permits) => {
                let permits = permits.clone();
                self.inner.handle.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    work.await;
                });
            }
            None => {
                self.inner.handle.spawn(work);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// The scheduler a component should use: its own, else its flow's, else
/// one on the current runtime.
pub(crate) fn resolve(
    explicit: Option<&Arc<dyn Scheduler>>,
    flow: Option<&FlowContext>,
) -> Result<Arc<dyn Scheduler>, SchedulerError> {
    match explicit.or_else(|| flow.map(FlowContext::scheduler)) {
        Some(scheduler) => Ok(scheduler.clone()),
        None => Ok(Arc::new(TokioScheduler::current()?)),
    }
}
