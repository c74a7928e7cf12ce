use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type StoreMap = HashMap<String, Value>;

/// Durable key/value storage shared by settings and cache snapshots.
///
/// Missing keys are simply absent from the map returned by `get`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap>;
    async fn set(&self, values: StoreMap) -> Result<()>;
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

pub type SharedKeyValueStore = Arc<dyn KeyValueStore>;

/// Process-local store, nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.values
                    .get(*key)
                    .map(|value| (key.to_string(), value.value().clone()))
            })
            .collect())
    }

    async fn set(&self, values: StoreMap) -> Result<()> {
        for (key, value) in values {
            self.values.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.values.remove(*key);
        }
        Ok(())
    }
}

/// Stores everything in one JSON object on disk.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                err
            ))),
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<Map<String, Value>> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(Error::storage(format!(
                "{} is not valid JSON: {}",
                self.path.display(),
                err
            ))),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match self.read().await? {
            Some(raw) => self.parse(&raw),
            None => Ok(Map::new()),
        }
    }

    /// Like `load`, but a corrupt document is replaced by an empty one so
    /// the next write can repair the file.
    async fn load_for_write(&self) -> Result<Map<String, Value>> {
        let Some(raw) = self.read().await? else {
            return Ok(Map::new());
        };
        match self.parse(&raw) {
            Ok(document) => Ok(document),
            Err(err) => {
                log::warn!("Discarding unreadable store contents: {}", err);
                Ok(Map::new())
            }
        }
    }

    async fn save(&self, document: Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(&Value::Object(document))?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        let mut document = self.load().await?;
        Ok(keys
            .iter()
            .filter_map(|key| document.remove(*key).map(|value| (key.to_string(), value)))
            .collect())
    }

    async fn set(&self, values: StoreMap) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load_for_write().await?;
        document.extend(values);
        self.save(document).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load_for_write().await?;
        let before = document.len();
        for key in keys {
            document.remove(*key);
        }
        if document.len() == before {
            return Ok(());
        }
        self.save(document).await
    }
}
