//! An in-memory storage backend

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BackendError, StorageBackend};

/// An in-process storage backend
///
/// Sessions stored here do not survive the process. Useful for tests and for
/// clients that intentionally re-authenticate on every start.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Constructs an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.items
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        self.items.lock().await.remove(key);
        Ok(())
    }
}
