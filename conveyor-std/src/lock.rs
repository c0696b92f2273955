//! In-memory lock factory.

use conveyor_core::{LockFactory, NamedLock};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Hands out named locks from a process-local table.
///
/// Entries nobody holds any more are pruned on the next request.
#[derive(Default)]
pub struct InMemoryLockFactory {
    locks: Mutex<HashMap<String, NamedLock>>,
}

impl InMemoryLockFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locks currently tracked.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no locks are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockFactory for InMemoryLockFactory {
    fn create_lock(&self, name: &str) -> NamedLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The table's own handle is the only one left for idle locks.
        locks.retain(|_, lock| lock.handles() > 1);
        locks
            .entry(name.to_string())
            .or_insert_with(|| NamedLock::new(name))
            .clone()
    }
}
