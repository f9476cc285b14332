//! In-memory `Store`, used by tests and as the `studio-cli` default backend.

use async_trait::async_trait;
use dashmap::DashMap;
use studio_core::{ListPage, Store, StudioResult};

#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StudioResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StudioResult<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StudioResult<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> StudioResult<ListPage> {
        let mut keys: Vec<String> =
            self.data.iter().map(|e| e.key().clone()).filter(|k| k.starts_with(prefix)).collect();
        keys.sort();
        let start = match cursor {
            Some(c) => keys.iter().position(|k| k.as_str() > c).unwrap_or(keys.len()),
            None => 0,
        };
        const PAGE_SIZE: usize = 100;
        let page: Vec<String> = keys[start..].iter().take(PAGE_SIZE).cloned().collect();
        let next_cursor = if start + page.len() < keys.len() { page.last().cloned() } else { None };
        Ok(ListPage { keys: page, cursor: next_cursor })
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> StudioResult<bool> {
        match self.data.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                if expected.as_deref() == Some(e.get().as_slice()) {
                    e.insert(new);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                if expected.is_none() {
                    e.insert(new);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expected() {
        let store = MemoryStore::new();
        store.put("tok", b"v1".to_vec()).await.unwrap();
        let ok = store.compare_and_set("tok", Some(b"wrong".to_vec()), b"v2".to_vec()).await.unwrap();
        assert!(!ok);
        assert_eq!(store.get("tok").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_succeeds_on_matching_expected() {
        let store = MemoryStore::new();
        store.put("tok", b"v1".to_vec()).await.unwrap();
        let ok = store.compare_and_set("tok", Some(b"v1".to_vec()), b"v2".to_vec()).await.unwrap();
        assert!(ok);
        assert_eq!(store.get("tok").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_none_expects_absence() {
        let store = MemoryStore::new();
        let ok = store.compare_and_set("fresh", None, b"v1".to_vec()).await.unwrap();
        assert!(ok);
        let ok2 = store.compare_and_set("fresh", None, b"v2".to_vec()).await.unwrap();
        assert!(!ok2);
    }

    #[tokio::test]
    async fn list_paginates_by_prefix() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.put(&format!("conn:{i}"), b"x".to_vec()).await.unwrap();
        }
        store.put("other:1", b"x".to_vec()).await.unwrap();
        let page = store.list("conn:", None).await.unwrap();
        assert_eq!(page.keys.len(), 5);
    }
}
