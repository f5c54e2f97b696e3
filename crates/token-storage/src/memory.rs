//! In-process store.

use crate::{KeyValueStore, StorageChange, StorageError, StorageResult, CHANGE_CHANNEL_CAPACITY};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Store backed by a `HashMap`, shared by every context of one process.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: Mutex::new(HashMap::new()),
            changes,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every operation fails with
    /// [`StorageError::Unavailable`] until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// Apply a mutation and notify, holding the lock so notifications are
    /// observed in write order.
    fn mutate(&self, key: &str, new_value: Option<Value>) {
        let mut data = self.data.lock();
        let old_value = match &new_value {
            Some(v) => data.insert(key.to_string(), v.clone()),
            None => data.remove(key),
        };
        if old_value == new_value {
            return;
        }
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.check_available()?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.check_available()?;
        self.mutate(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_available()?;
        self.mutate(key, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();

        store.set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(store.has("k").await.unwrap());

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_changes_reach_every_subscriber() {
        let store = MemoryStore::new();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        store.set("k", json!("v1")).await.unwrap();

        for rx in [&mut first, &mut second] {
            let change = rx.recv().await.unwrap();
            assert_eq!(change.key, "k");
            assert_eq!(change.old_value, None);
            assert_eq!(change.new_value, Some(json!("v1")));
        }
    }

    #[tokio::test]
    async fn test_unchanged_writes_are_silent() {
        let store = MemoryStore::new();
        store.set("k", json!("v1")).await.unwrap();
        let mut rx = store.subscribe();

        store.set("k", json!("v1")).await.unwrap();
        store.remove("missing").await.unwrap();
        store.remove("k").await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.old_value, Some(json!("v1")));
        assert_eq!(change.new_value, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_transiently() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.set("k", json!(1)).await.is_err());

        store.set_unavailable(false);
        store.set("k", json!(1)).await.unwrap();
    }
}
