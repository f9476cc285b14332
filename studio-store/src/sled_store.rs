//! Durable `Store` backed by `sled`, used as the Scheduler's side-log
//! (spec §4.1 "Failure model": reconstructing `concurrent` on restart).

use std::path::Path;

use async_trait::async_trait;
use sled::Db;
use studio_core::{ListPage, Store, StudioError, StudioResult};

pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StudioResult<Self> {
        let db = sled::open(path).map_err(|e| StudioError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn open_temporary() -> StudioResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StudioError::Storage(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl Store for SledStore {
    async fn get(&self, key: &str) -> StudioResult<Option<Vec<u8>>> {
        self.db
            .get(key.as_bytes())
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StudioError::Storage(e.to_string()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StudioResult<()> {
        self.db.insert(key.as_bytes(), value).map_err(|e| StudioError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StudioResult<()> {
        self.db.remove(key.as_bytes()).map_err(|e| StudioError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> StudioResult<ListPage> {
        const PAGE_SIZE: usize = 100;
        let mut keys = Vec::new();
        let mut next_cursor = None;
        let mut skipping = cursor.is_some();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry.map_err(|e| StudioError::Storage(e.to_string()))?;
            let key = String::from_utf8_lossy(&key).to_string();
            if skipping {
                if cursor == Some(key.as_str()) {
                    skipping = false;
                }
                continue;
            }
            if keys.len() == PAGE_SIZE {
                next_cursor = Some(key);
                break;
            }
            keys.push(key);
        }
        Ok(ListPage { keys, cursor: next_cursor })
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> StudioResult<bool> {
        let current = expected.as_deref();
        match self.db.compare_and_swap(key.as_bytes(), current, Some(new)) {
            Ok(Ok(())) => {
                self.db.flush_async().await.map_err(|e| StudioError::Storage(e.to_string()))?;
                Ok(true)
            }
            Ok(Err(_)) => Ok(false),
            Err(e) => Err(StudioError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_sled() {
        let store = SledStore::open_temporary().unwrap();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_is_atomic_against_stale_caller() {
        let store = SledStore::open_temporary().unwrap();
        store.put("tok", b"old".to_vec()).await.unwrap();
        let first = store.compare_and_set("tok", Some(b"old".to_vec()), b"new".to_vec()).await.unwrap();
        let second = store.compare_and_set("tok", Some(b"old".to_vec()), b"other".to_vec()).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.get("tok").await.unwrap(), Some(b"new".to_vec()));
    }
}
