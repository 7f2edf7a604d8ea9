//! In-memory storage adapter: a single exclusive critical section per
//! spec.md §4.1, suitable for a single-process deployment or tests.

use crate::{now_millis, NodeMeta, StorageAdapter, StoreError};
use parking_lot::Mutex;
use reality_hash::ContentHash;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, NodeMeta>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { inner: Mutex::new(Inner::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageAdapter for MemoryStore {
    async fn get_node(&self, key: &str) -> Result<Option<NodeMeta>, StoreError> {
        Ok(self.inner.lock().nodes.get(key).cloned())
    }

    async fn get_nodes(&self, keys: &[String]) -> Result<HashMap<String, NodeMeta>, StoreError> {
        let guard = self.inner.lock();
        Ok(keys.iter().filter_map(|k| guard.nodes.get(k).map(|n| (k.clone(), n.clone()))).collect())
    }

    async fn increment_version(&self, key: &str, hash: ContentHash) -> Result<NodeMeta, StoreError> {
        let mut guard = self.inner.lock();
        let new_version = guard.nodes.values().map(|n| n.version).max().unwrap_or(0) + 1;
        let meta = NodeMeta { key: key.to_string(), version: new_version, hash, updated_at: now_millis() };
        guard.nodes.insert(key.to_string(), meta.clone());
        Ok(meta)
    }

    async fn set_node(&self, key: &str, version: u64, hash: ContentHash) -> Result<NodeMeta, StoreError> {
        let mut guard = self.inner.lock();
        let meta = NodeMeta { key: key.to_string(), version, hash, updated_at: now_millis() };
        guard.nodes.insert(key.to_string(), meta.clone());
        Ok(meta)
    }

    async fn list_changed_since(&self, version: u64) -> Result<Vec<NodeMeta>, StoreError> {
        let guard = self.inner.lock();
        let mut changed: Vec<NodeMeta> =
            guard.nodes.values().filter(|n| n.version > version).cloned().collect();
        changed.sort_by_key(|n| n.version);
        Ok(changed)
    }

    async fn get_max_version(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().nodes.values().map(|n| n.version).max().unwrap_or(0))
    }

    async fn delete_node(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().nodes.remove(key);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let _ = self.inner.lock().nodes.len();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_are_strictly_monotonic() {
        let store = MemoryStore::new();
        let a = store.increment_version("a", ContentHash::of(&"1").unwrap()).await.unwrap();
        let b = store.increment_version("b", ContentHash::of(&"2").unwrap()).await.unwrap();
        assert!(b.version > a.version);
        assert_eq!(store.get_max_version().await.unwrap(), b.version);
    }

    #[tokio::test]
    async fn unknown_key_is_absent_not_null() {
        let store = MemoryStore::new();
        let nodes = store.get_nodes(&["ghost".to_string()]).await.unwrap();
        assert!(!nodes.contains_key("ghost"));
        assert!(store.get_node("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_changed_since_is_ordered_ascending() {
        let store = MemoryStore::new();
        store.increment_version("a", ContentHash::EMPTY).await.unwrap();
        store.increment_version("b", ContentHash::EMPTY).await.unwrap();
        store.increment_version("a", ContentHash::EMPTY).await.unwrap();
        let changed = store.list_changed_since(0).await.unwrap();
        let versions: Vec<u64> = changed.iter().map(|n| n.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }

    #[tokio::test]
    async fn concurrent_increments_never_collide() {
        use std::sync::Arc;
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = if i % 2 == 0 { "a" } else { "b" };
                store.increment_version(key, ContentHash::EMPTY).await.unwrap()
            }));
        }
        let mut versions = Vec::new();
        for h in handles {
            versions.push(h.await.unwrap().version);
        }
        versions.sort();
        let mut deduped = versions.clone();
        deduped.dedup();
        assert_eq!(versions.len(), deduped.len(), "no two increments should return the same version");
    }

    #[tokio::test]
    async fn delete_removes_node() {
        let store = MemoryStore::new();
        store.increment_version("a", ContentHash::EMPTY).await.unwrap();
        store.delete_node("a").await.unwrap();
        assert!(store.get_node("a").await.unwrap().is_none());
    }
}
