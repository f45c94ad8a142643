//! Storage layer: two independent string->string maps, each guarded by its
//! own reader/writer lock. No transactional coupling between the two.

use std::collections::HashMap;

use tokio::sync::RwLock;

#[derive(Default)]
pub struct KvMap {
    inner: RwLock<HashMap<String, String>>,
}

impl KvMap {
    pub fn new() -> Self {
        KvMap {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: String, value: String) {
        self.inner.write().await.insert(key, value);
    }

    pub async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    /// A copied snapshot, never a reference to the live map (open question
    /// #1 in spec.md §9: the Go source hands back the live map, which races
    /// with concurrent mutators).
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().await.clone()
    }

    /// Union-merges `incoming` into this map; `incoming` wins on key
    /// conflicts, matching fix-predecessor's "backup wins" promotion rule.
    pub async fn merge_from(&self, incoming: HashMap<String, String>) {
        let mut guard = self.inner.write().await;
        for (k, v) in incoming {
            guard.insert(k, v);
        }
    }

    /// Replaces the whole map, e.g. when fix-predecessor promotes backup
    /// into primary and then needs to reset backup to empty.
    pub async fn replace(&self, data: HashMap<String, String>) {
        *self.inner.write().await = data;
    }

    /// Removes every key for which `predicate(key)` is true, returning the
    /// removed entries. Used by the post-Notify sweep (§4.8) that evicts
    /// keys no longer owned after adopting a new predecessor.
    pub async fn retain_removing(
        &self,
        mut predicate: impl FnMut(&str) -> bool,
    ) -> Vec<(String, String)> {
        let mut guard = self.inner.write().await;
        let to_remove: Vec<String> = guard
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(to_remove.len());
        for k in to_remove {
            if let Some(v) = guard.remove(&k) {
                removed.push((k, v));
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let map = KvMap::new();
        map.put("k".into(), "v".into()).await;
        assert_eq!(map.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let map = KvMap::new();
        map.put("k".into(), "v".into()).await;
        map.delete("k").await;
        assert_eq!(map.get("k").await, None);
    }

    #[tokio::test]
    async fn merge_from_prefers_incoming() {
        let map = KvMap::new();
        map.put("k".into(), "old".into()).await;
        let mut incoming = HashMap::new();
        incoming.insert("k".to_string(), "new".to_string());
        map.merge_from(incoming).await;
        assert_eq!(map.get("k").await, Some("new".to_string()));
    }

    #[tokio::test]
    async fn snapshot_is_independent_of_later_mutation() {
        let map = KvMap::new();
        map.put("k".into(), "v".into()).await;
        let snap = map.snapshot().await;
        map.put("k".into(), "changed".into()).await;
        assert_eq!(snap.get("k"), Some(&"v".to_string()));
    }
}
