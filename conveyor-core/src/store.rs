//! Keyed object store contract.

use crate::error::StoreError;
use async_trait::async_trait;

/// A keyed store of values.
///
/// Implementations may serialize values, so callers must not rely on
/// reference identity surviving a `store`/`retrieve` round trip.
#[async_trait]
pub trait ObjectStore<V>: Send + Sync
where
    V: Send + 'static,
{
    /// Whether a value is stored under `key`.
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Store a value. Fails with [`StoreError::AlreadyExists`] if `key` is taken.
    async fn store(&self, key: &str, value: V) -> Result<(), StoreError>;

    /// Read a value. Fails with [`StoreError::NotFound`] if `key` is absent.
    async fn retrieve(&self, key: &str) -> Result<V, StoreError>;

    /// Remove and return a value. Fails with [`StoreError::NotFound`] if `key` is absent.
    async fn remove(&self, key: &str) -> Result<V, StoreError>;

    /// Remove every value.
    async fn clear(&self) -> Result<(), StoreError>;
}
