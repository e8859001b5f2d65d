//! Device-local state as one flat JSON object in a file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use client_core::{DeviceKv, StoreError};
use tokio::sync::Mutex;

/// [`DeviceKv`] over a JSON file. Every write rewrites the whole file; the
/// map stays tiny (one credential and one nickname per room).
pub struct FileKv {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    /// Loads the file, or starts empty when it does not exist yet. A file
    /// that exists but does not parse is an error rather than a silent
    /// reset; it may hold owner credentials.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("state file {} is not valid JSON", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("cannot read state file {}", path.display()))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|err| StoreError::Backend(err.into()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|err| StoreError::Backend(err.into()))
    }
}

#[async_trait]
impl DeviceKv for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/kv_tests.rs"]
mod tests;
