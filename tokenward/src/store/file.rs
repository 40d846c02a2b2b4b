//! A file-backed storage backend

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::sync::Mutex;

use super::{BackendError, StorageBackend};

/// A storage backend persisting items as a JSON object in a local file
///
/// This allows a session to be reused across process restarts. The file is
/// created on first write; on unix it is created with owner-only permissions.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles against the same file
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Constructs a file-backed storage backend at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_items(&self) -> Result<BTreeMap<String, String>, BackendError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_items(&self, items: &BTreeMap<String, String>) -> Result<(), BackendError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(items)?;
        file.write_all(data.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.read_items().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_items().await?;
        items.insert(key.to_owned(), value.to_owned());
        self.write_items(&items).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_items().await?;
        if items.remove(key).is_some() {
            self.write_items(&items).await?;
        }
        Ok(())
    }
}
