//! Storage trait definitions.

use crate::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// One effective change to a key.
///
/// `None` on either side means the key was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Trait for the extension's persistent key-value store.
///
/// Writes replace a value whole. Every write that changes a value produces
/// exactly one [`StorageChange`] on every subscription, the writer's
/// included. Writing a value equal to the current one, or removing an
/// absent key, produces none.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Delete a value
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribe to change notifications from this point on
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;

    /// Check if a key exists
    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
