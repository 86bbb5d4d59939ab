use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use keel_core::store::{PathStream, StoreError, StoreResult};

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// A [`keel_core::Store`] that keeps every object in memory.
///
/// Counts writes so tests can assert when an operation touched storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: DashMap<String, Bytes>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put_bytes` and `delete` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl keel_core::store::Store for MemoryStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.record_write();
        self.files.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        Ok(file.clone())
    }

    async fn list(&self) -> StoreResult<PathStream> {
        let keys: Vec<Result<String, io::Error>> = self
            .files
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();
        Ok(Box::new(stream::iter(keys)))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.record_write();
        self.files.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Store;
    use keel_core::testutil::StoreTests;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        StoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn counts_writes_but_not_reads() {
        let store = MemoryStore::new();
        store
            .put_bytes("root.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        store.read_bytes("root.json").await.unwrap();
        store.exists("root.json").await.unwrap();
        assert_eq!(store.write_count(), 1);
        store.delete("root.json").await.unwrap();
        assert_eq!(store.write_count(), 2);
    }
}
