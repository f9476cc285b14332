//! The opaque key-scoped store boundary (spec §6 "Persisted state").
//!
//! The core treats persistence as an implementation of this trait only;
//! concrete backends (in-memory, sled) live in `studio-store`.

use async_trait::async_trait;

use crate::error::StudioResult;

/// A page of keys returned by [`Store::list`].
#[derive(Debug, Clone)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> StudioResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> StudioResult<()>;

    async fn delete(&self, key: &str) -> StudioResult<()>;

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> StudioResult<ListPage>;

    /// Atomically replace `key`'s value with `new` iff its current value
    /// equals `expected` (`None` means "key must not exist"). Used by the
    /// Credential/Token Manager to install a refreshed token without a
    /// lost-update race against a concurrent refresh writer.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> StudioResult<bool>;
}
