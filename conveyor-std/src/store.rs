//! Object store implementations.
//!
//! - [`InMemoryObjectStore`]: keeps values as they are
//! - [`SerializingObjectStore`]: keeps values as JSON, so every read
//!   produces a fresh value

use conveyor_core::{ObjectStore, StoreError, async_trait};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::{HashMap, hash_map::Entry},
    marker::PhantomData,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A store holding values in memory.
pub struct InMemoryObjectStore<V> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> InMemoryObjectStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Default for InMemoryObjectStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> ObjectStore<V> for InMemoryObjectStore<V>
where
    V: Clone + Send + 'static,
{
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries().contains_key(key))
    }

    async fn store(&self, key: &str, value: V) -> Result<(), StoreError> {
        match self.entries().entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    async fn retrieve(&self, key: &str) -> Result<V, StoreError> {
        self.entries()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<V, StoreError> {
        self.entries()
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries().clear();
        Ok(())
    }
}

/// A store holding values as serialized JSON.
pub struct SerializingObjectStore<V> {
    inner: InMemoryObjectStore<Vec<u8>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> SerializingObjectStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: InMemoryObjectStore::new(),
            _marker: PhantomData,
        }
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<V, StoreError>
    where
        V: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
    }
}

impl<V> Default for SerializingObjectStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> ObjectStore<V> for SerializingObjectStore<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.contains(key).await
    }

    async fn store(&self, key: &str, value: V) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.inner.store(key, bytes).await
    }

    async fn retrieve(&self, key: &str) -> Result<V, StoreError> {
        let bytes = self.inner.retrieve(key).await?;
        Self::decode(key, &bytes)
    }

    async fn remove(&self, key: &str) -> Result<V, StoreError> {
        let bytes = self.inner.remove(key).await?;
        Self::decode(key, &bytes)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    async fn exercise(store: &dyn ObjectStore<u32>) {
        assert!(!store.contains("a").await.unwrap());
        store.store("a", 1).await.unwrap();
        assert!(store.contains("a").await.unwrap());
        assert!(matches!(
            store.store("a", 2).await,
            Err(StoreError::AlreadyExists(key)) if key == "a"
        ));
        assert_eq!(store.retrieve("a").await.unwrap(), 1);
        assert_eq!(store.remove("a").await.unwrap(), 1);
        assert!(matches!(
            store.retrieve("a").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.remove("a").await, Err(StoreError::NotFound(_))));

        store.store("b", 3).await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_contract() {
        exercise(&InMemoryObjectStore::<u32>::new()).await;
    }

    #[tokio::test]
    async fn test_serializing_contract() {
        exercise(&SerializingObjectStore::<u32>::new()).await;
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        tries: Vec<u8>,
    }

    #[tokio::test]
    async fn test_serializing_returns_fresh_values() {
        let store = SerializingObjectStore::<Record>::new();
        let record = Record {
            name: "r".to_string(),
            tries: vec![1, 2],
        };
        store.store("k", record).await.unwrap();

        let mut first = store.retrieve("k").await.unwrap();
        first.tries.push(3);
        let second = store.retrieve("k").await.unwrap();
        assert_eq!(second.tries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_serializing_reports_bad_bytes() {
        let store = SerializingObjectStore::<u32>::new();
        store.inner.store("k", b"not json".to_vec()).await.unwrap();
        assert!(matches!(
            store.retrieve("k").await,
            Err(StoreError::Serialization { key, .. }) if key == "k"
        ));
    }
}
