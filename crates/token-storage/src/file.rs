//! JSON-file store under `~/.tabsync`.
//!
//! The whole map is rewritten on every change (temp file + rename), so a
//! crash leaves either the old or the new snapshot on disk. Change
//! notifications are delivered to subscribers of this process only.

use crate::{KeyValueStore, StorageChange, StorageError, StorageResult, CHANGE_CHANNEL_CAPACITY};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use sync_config_and_utils::Paths;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Store persisted as one JSON object of key → value.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                other => {
                    return Err(StorageError::Encoding(format!(
                        "{} does not hold a JSON object (found {})",
                        path.display(),
                        json_kind(&other)
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), keys = data.len(), "opened file store");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            data: Mutex::new(data),
            changes,
        })
    }

    /// Open the store at the default location (`~/.tabsync/storage.local.json`).
    pub async fn open_default(paths: &Paths) -> StorageResult<Self> {
        Self::open(paths.store_file()).await
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &Map<String, Value>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn mutate(&self, key: &str, new_value: Option<Value>) -> StorageResult<()> {
        let mut data = self.data.lock().await;
        let old_value = data.get(key).cloned();
        if old_value == new_value {
            return Ok(());
        }

        let mut next = data.clone();
        match &new_value {
            Some(v) => {
                next.insert(key.to_string(), v.clone());
            }
            None => {
                next.remove(key);
            }
        }
        self.persist(&next).await?;
        *data = next;

        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.mutate(key, Some(value)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.mutate(key, None).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.local.json");

        let store = FileStore::open(&path).await.unwrap();
        store.set("supabase_token", json!({"access_token": "abc"})).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("supabase_token").await.unwrap(),
            Some(json!({"access_token": "abc"}))
        );
    }

    #[tokio::test]
    async fn test_file_store_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.local.json");

        let store = FileStore::open(&path).await.unwrap();
        store.set("k", json!(1)).await.unwrap();
        store.remove("k").await.unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_notifies_subscribers() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("s.json")).await.unwrap();
        let mut rx = store.subscribe();

        store.set("k", json!("v")).await.unwrap();
        store.set("k", json!("v")).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.new_value, Some(json!("v")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_file_store_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = FileStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StorageError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_file_store_default_location() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let store = FileStore::open_default(&paths).await.unwrap();
        assert_eq!(store.path(), paths.store_file());
    }
}
