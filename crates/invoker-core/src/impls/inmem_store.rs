//! InMemoryObjectStore - object store for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ports::ObjectStore;

/// `HashMap<String, Vec<u8>>` behind a `RwLock`.
///
/// The lock is only held for the map operation itself, never across an
/// `.await`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object synchronously (handy when building fixtures).
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), bytes.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.insert(key, bytes);
        Ok(())
    }
}
