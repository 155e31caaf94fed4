//! The key-value storage interface consumed by this crate and by
//! `groupwire-client`'s higher-level namespaces (group state, invite inbox).
//!
//! Storage backends are external collaborators: this crate only depends on
//! the interface. Each store is expected to serialize concurrent writes to
//! itself internally; last-writer-wins is acceptable since every facade
//! writes only its own keys (§5).

use async_trait::async_trait;

use crate::error::CoreError;

/// A single namespaced key-value store.
///
/// Implementations back: the key-package custody namespace (keyed by
/// reference), the group-state namespace (keyed by group id), and the three
/// invite namespaces (keyed by event/rumor id).
#[async_trait]
pub trait KvStore<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &K) -> Result<Option<V>, CoreError>;

    /// Writes `value` under `key`, replacing any prior value.
    async fn set(&self, key: K, value: V) -> Result<(), CoreError>;

    /// Removes the value stored under `key`, if any.
    async fn remove(&self, key: &K) -> Result<(), CoreError>;

    /// Lists all stored values.
    async fn list(&self) -> Result<Vec<V>, CoreError>;

    /// Lists all stored keys.
    async fn keys(&self) -> Result<Vec<K>, CoreError>;
}

/// Forwards through an `Arc`, so a trait-object store composes with any
/// generic code written against `S: KvStore<K, V>`.
#[async_trait]
impl<K, V> KvStore<K, V> for std::sync::Arc<dyn KvStore<K, V>>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn get(&self, key: &K) -> Result<Option<V>, CoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: K, value: V) -> Result<(), CoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &K) -> Result<(), CoreError> {
        (**self).remove(key).await
    }

    async fn list(&self) -> Result<Vec<V>, CoreError> {
        (**self).list().await
    }

    async fn keys(&self) -> Result<Vec<K>, CoreError> {
        (**self).keys().await
    }
}
