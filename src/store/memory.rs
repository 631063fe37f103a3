//! In-memory [`ObjectStore`] for tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::ObjectStore;
use crate::error::RepoKbError;

/// Container backed by a sorted map.
pub struct InMemoryObjectStore {
    name: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a container pre-populated with `(key, bytes)` pairs.
    pub fn with_objects<K, V>(name: impl Into<String>, objects: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new(name);
        {
            let mut map = store.objects.write().unwrap_or_else(|e| e.into_inner());
            for (k, v) in objects {
                map.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Snapshot of the whole container.
    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn container(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<String>> {
        let map = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.keys().cloned().collect())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let map = self.objects.read().unwrap_or_else(|e| e.into_inner());
        map.get(key)
            .cloned()
            .ok_or_else(|| RepoKbError::Store(format!("object not found: {}", key)).into())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.objects.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryObjectStore::new("c");
        store.put("a/b.txt", b"hi".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b.txt").await.unwrap(), b"hi");
        assert_eq!(store.list().await.unwrap(), vec!["a/b.txt"]);

        store.delete("a/b.txt").await.unwrap();
        store.delete("a/b.txt").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get("a/b.txt").await.is_err());
    }
}
