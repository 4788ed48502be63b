//! JSON-file key-value store.
//!
//! One file per namespace, `kv_store_{namespace}.json`, holding a single
//! JSON object. Entries are loaded on creation and written back on `flush`.
//! A file that fails to parse, including a single entry that no longer
//! deserializes into `T`, fails `open` instead of loading partially.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timegraph_core::{KvStore, StorageError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::persist::{read_json, write_json};

pub struct JsonKvStore<T> {
    namespace: String,
    path: Option<PathBuf>,
    data: Arc<RwLock<BTreeMap<String, T>>>,
}

impl<T> JsonKvStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open the namespace under `working_dir`, loading any existing file.
    pub fn open(working_dir: &Path, namespace: &str) -> Result<Self, StorageError> {
        let path = working_dir.join(format!("kv_store_{namespace}.json"));
        let data = Self::load_from_disk(&path)?;
        debug!(namespace, path = %path.display(), count = data.len(), "KV store loaded");
        Ok(Self {
            namespace: namespace.to_string(),
            path: Some(path),
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            path: None,
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load_from_disk(path: &Path) -> Result<BTreeMap<String, T>, StorageError> {
        let raw: BTreeMap<String, serde_json::Value> = match read_json(path)? {
            Some(raw) => raw,
            None => return Ok(BTreeMap::new()),
        };

        raw.into_iter()
            .map(|(key, value)| match serde_json::from_value::<T>(value) {
                Ok(entry) => Ok((key, entry)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Corrupted KV entry");
                    Err(StorageError::Storage(format!(
                        "Corrupted entry {key} in {}: {e}",
                        path.display()
                    )))
                }
            })
            .collect()
    }
}

#[async_trait]
impl<T> KvStore<T> for JsonKvStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.read().await.keys().cloned().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>, StorageError> {
        Ok(self.data.read().await.get(id).cloned())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Option<T>>, StorageError> {
        let data = self.data.read().await;
        Ok(ids.iter().map(|id| data.get(id).cloned()).collect())
    }

    async fn filter_keys(&self, keys: &[String]) -> Result<BTreeSet<String>, StorageError> {
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .filter(|k| !data.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert(&self, entries: BTreeMap<String, T>) -> Result<(), StorageError> {
        self.data.write().await.extend(entries);
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), StorageError> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.read().await;
        write_json(path, &*data).await?;
        debug!(namespace = %self.namespace, count = data.len(), "KV store flushed");
        Ok(())
    }
}
