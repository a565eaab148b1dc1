//! In-memory [`CacheBackend`] used by tests and embedded setups.

use std::collections::BTreeMap;
use std::io;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;

use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::store::{CacheBackend, Deleted, EntryInfo, StoreError, age_since};

const SOURCE: &str = "cache::memory";

#[derive(Clone)]
struct StoredBody {
    body: Bytes,
    modified: SystemTime,
}

/// Map-backed store. Each write swaps the whole body under the lock.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<CacheKey, StoredBody>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the entry was written `seconds` earlier than recorded.
    pub fn backdate(&self, key: &CacheKey, seconds: u64) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "backdate");
        match entries.get_mut(key) {
            Some(entry) => {
                entry.modified = entry
                    .modified
                    .checked_sub(Duration::from_secs(seconds))
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                true
            }
            None => false,
        }
    }

    /// Make every subsequent write fail, as an unwritable disk would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn exists(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "exists").contains_key(key)
    }

    async fn read(&self, key: &CacheKey) -> Result<Bytes, StoreError> {
        rw_read(&self.entries, SOURCE, "read")
            .get(key)
            .map(|entry| entry.body.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cache storage is read-only",
            )));
        }
        let entry = StoredBody {
            body: Bytes::copy_from_slice(body),
            modified: SystemTime::now(),
        };
        rw_write(&self.entries, SOURCE, "write").insert(key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<Deleted, StoreError> {
        let removed = rw_write(&self.entries, SOURCE, "delete").remove(key);
        Ok(match removed {
            Some(_) => Deleted::Removed,
            None => Deleted::NotFound,
        })
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_all");
        let count = entries.len();
        entries.clear();
        Ok(count)
    }

    async fn age_seconds(&self, key: &CacheKey) -> Result<u64, StoreError> {
        rw_read(&self.entries, SOURCE, "age_seconds")
            .get(key)
            .map(|entry| age_since(entry.modified))
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<EntryInfo>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "list")
            .iter()
            .map(|(key, entry)| EntryInfo {
                key: key.clone(),
                size_bytes: entry.body.len() as u64,
                modified: entry.modified,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::device::DeviceClass;
    use crate::cache::keys::build_key;

    #[tokio::test]
    async fn roundtrip_and_backdate() {
        let store = MemoryStore::new();
        let key = build_key("/memory", DeviceClass::Desktop);

        store.write(&key, b"body").await.expect("write");
        assert_eq!(&store.read(&key).await.expect("read")[..], b"body");
        assert_eq!(store.age_seconds(&key).await.expect("age"), 0);

        assert!(store.backdate(&key, 90));
        assert!(store.age_seconds(&key).await.expect("age") >= 90);
    }

    #[tokio::test]
    async fn failing_writes_store_nothing() {
        let store = MemoryStore::new();
        let key = build_key("/ro", DeviceClass::Desktop);
        store.set_fail_writes(true);

        assert!(matches!(
            store.write(&key, b"body").await,
            Err(StoreError::Io(_))
        ));
        assert!(!store.exists(&key).await);
    }

    #[tokio::test]
    async fn delete_all_reports_count() {
        let store = MemoryStore::new();
        for path in ["/a", "/b", "/c"] {
            store
                .write(&build_key(path, DeviceClass::Desktop), b"x")
                .await
                .expect("write");
        }
        assert_eq!(store.delete_all().await.expect("clear"), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let store = MemoryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let key = build_key("/poisoned", DeviceClass::Desktop);
        store.write(&key, b"still works").await.expect("write");
        assert!(store.exists(&key).await);
    }
}
