//! Named lock contract.

use std::{fmt, future::Future, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

tokio::task_local! {
    // Locks taken through `NamedLock::hold` by the enclosing work.
    static HELD: Vec<Arc<Mutex<()>>>;
}

/// Produces named locks. Equal names yield the same underlying lock for as
/// long as any handle to it is alive; different names never contend.
pub trait LockFactory: Send + Sync {
    /// Obtain the lock called `name`.
    fn create_lock(&self, name: &str) -> NamedLock;
}

/// An asynchronous mutual-exclusion lock with a name.
///
/// [`hold`](Self::hold) is reentrant: work already running under the lock
/// may take it again. [`lock`](Self::lock) and [`try_lock`](Self::try_lock)
/// are not, and deadlock or fail when called under the same lock.
#[derive(Clone)]
pub struct NamedLock {
    name: Arc<str>,
    inner: Arc<Mutex<()>>,
}

impl NamedLock {
    /// Create a fresh lock.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the lock.
    pub async fn lock(&self) -> NamedLockGuard {
        NamedLockGuard {
            _guard: self.inner.clone().lock_owned().await,
        }
    }

    /// Run `work` while holding the lock.
    ///
    /// Nested calls for the same lock from inside `work` run straight away.
    /// Work spawned onto other tasks does not inherit the lock.
    pub async fn hold<F: Future>(&self, work: F) -> F::Output {
        let mut held = HELD.try_with(Clone::clone).unwrap_or_default();
        if held.iter().any(|lock| Arc::ptr_eq(lock, &self.inner)) {
            return work.await;
        }
        let _guard = self.lock().await;
        held.push(self.inner.clone());
        HELD.scope(held, work).await
    }

    /// Take the lock if it is free.
    pub fn try_lock(&self) -> Option<NamedLockGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| NamedLockGuard { _guard: guard })
    }

    /// Number of live handles to this lock.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same lock.
    pub fn ptr_eq(&self, other: &NamedLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLock").field("name", &self.name).finish()
    }
}

/// Holds a [`NamedLock`] until dropped.
pub struct NamedLockGuard {
    _guard: OwnedMutexGuard<()>,
}
