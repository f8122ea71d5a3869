//! Narrow keyed-state abstraction for process-wide tables.
//!
//! The replay session table and the quota table both live behind
//! [`KeyValueStore`] so an in-memory map can be swapped for a shared store
//! without touching the components that own the state. The trait is
//! deliberately small: `get`/`set`/`delete` plus key enumeration for sweeps.
//!
//! Values are returned by clone. Owners that need read-modify-write
//! atomicity serialize their own operations; the store only guarantees that
//! each individual call is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Keyed storage for component-owned state.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V>;

    async fn set(&self, key: &str, value: V);

    /// Removes `key`. Returns whether a value was present.
    async fn delete(&self, key: &str) -> bool;

    /// Snapshot of the keys currently stored, in no particular order.
    async fn keys(&self) -> Vec<String>;
}

/// Shared handle to a store implementation.
pub type SharedStore<V> = Arc<dyn KeyValueStore<V>>;

/// Process-local store backed by a `HashMap`.
///
/// State does not survive a restart.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Convenience constructor returning the store as a trait object.
    pub fn shared() -> SharedStore<V> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: V) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}
