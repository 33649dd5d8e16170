// SPDX-License-Identifier: Apache-2.0

//! Keyed storage for tasks and task events. `MemoryStore` is an in-process
//! `HashMap` behind a `tokio::sync::Mutex`; `RocksStore` persists the same
//! shape to an embedded key-value database on disk, JSON-encoding each
//! value.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use rocksdb::DB;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

#[async_trait::async_trait]
pub trait Store<V>: Send + Sync {
    async fn put(&self, key: &str, value: V) -> Result<()>;
    async fn get(&self, key: &str) -> Result<V>;
    async fn list(&self) -> Result<Vec<V>>;
    async fn count(&self) -> Result<usize>;
}

/// Backs a store with a plain `HashMap`. Used by tests and by any deployment
/// that accepts losing task history across a restart.
pub struct MemoryStore<V> {
    items: Mutex<HashMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        MemoryStore {
            items: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<V: Clone + Send + Sync> Store<V> for MemoryStore<V> {
    async fn put(&self, key: &str, value: V) -> Result<()> {
        self.items.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<V> {
        self.items
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn list(&self) -> Result<Vec<V>> {
        Ok(self.items.lock().await.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.items.lock().await.len())
    }
}

/// Backs a store with an embedded key-value database directory. Every value
/// is JSON-encoded before being written; the directory is created with
/// owner-only permissions (`0700`) on first open, the closest RocksDB
/// analog to a single `0600` database file.
pub struct RocksStore<V> {
    db: Arc<Mutex<DB>>,
    _value: PhantomData<V>,
}

impl<V> RocksStore<V> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| Error::Fatal(format!("creating store directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| Error::Fatal(format!("setting store directory permissions: {e}")))?;
        }
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| Error::Fatal(format!("opening store at {}: {e}", path.display())))?;
        Ok(RocksStore {
            db: Arc::new(Mutex::new(db)),
            _value: PhantomData,
        })
    }
}

#[async_trait::async_trait]
impl<V: Serialize + DeserializeOwned + Send + Sync> Store<V> for RocksStore<V> {
    async fn put(&self, key: &str, value: V) -> Result<()> {
        let encoded = serde_json::to_vec(&value).map_err(|e| Error::Unavailable(e.to_string()))?;
        self.db
            .lock()
            .await
            .put(key.as_bytes(), encoded)
            .map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<V> {
        let raw = self
            .db
            .lock()
            .await
            .get(key.as_bytes())
            .map_err(|e| Error::Unavailable(e.to_string()))?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| Error::Unavailable(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<V>> {
        let db = self.db.lock().await;
        let mut out = Vec::new();
        for item in db.iterator(rocksdb::IteratorMode::Start) {
            let (_, raw) = item.map_err(|e| Error::Unavailable(e.to_string()))?;
            out.push(serde_json::from_slice(&raw).map_err(|e| Error::Unavailable(e.to_string()))?);
        }
        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[tokio::test]
    async fn memory_store_put_get_round_trips() {
        let store: MemoryStore<Task> = MemoryStore::new();
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        let id = task.id.to_string();
        store.put(&id, task.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_store_get_missing_key_fails_not_found() {
        let store: MemoryStore<Task> = MemoryStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn rocks_store_put_get_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: RocksStore<Task> = RocksStore::open(dir.path()).unwrap();
        let task = Task::new("web", "nginx", 0.1, 64, 128);
        let id = task.id.to_string();
        store.put(&id, task.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.name, "web");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
