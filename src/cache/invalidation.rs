//! Invalidation engine.
//!
//! Turns changed URLs into deletions of both device variants. Each deletion
//! stands alone: a failure is recorded and the remaining keys are still
//! processed.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::events::{CacheNotice, ContentEvent};
use super::keys::{CacheKey, strip_query, variant_keys};
use super::orchestrator::PageCache;
use super::store::{Deleted, StoreError};

const METRIC_INVALIDATED: &str = "presto_page_cache_invalidated_total";
const RELATIVE_BASE: &str = "http://localhost/";

/// One deletion that did not go through.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationFailure {
    pub key: CacheKey,
    pub error: String,
}

/// What a single invalidation pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvalidationReport {
    /// Request paths the URLs resolved to.
    pub paths: Vec<String>,
    pub removed: Vec<CacheKey>,
    /// Keys that had no entry; not a failure.
    pub missing: usize,
    pub failures: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: InvalidationReport) {
        self.paths.extend(other.paths);
        self.removed.extend(other.removed);
        self.missing += other.missing;
        self.failures.extend(other.failures);
    }
}

pub struct InvalidationEngine {
    cache: Arc<PageCache>,
}

impl InvalidationEngine {
    pub fn new(cache: Arc<PageCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Delete the desktop and mobile entries for every URL.
    pub async fn on_content_changed<I, S>(&self, urls: I) -> InvalidationReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = InvalidationReport::default();

        for url in urls {
            let path = request_path(url.as_ref());
            if report.paths.contains(&path) {
                continue;
            }

            for key in variant_keys(&path) {
                match self.cache.backend().delete(&key).await {
                    Ok(Deleted::Removed) => report.removed.push(key),
                    Ok(Deleted::NotFound) => report.missing += 1,
                    Err(err) => {
                        warn!(key = %key, error = %err, "failed to invalidate cache entry");
                        report.failures.push(InvalidationFailure {
                            key,
                            error: err.to_string(),
                        });
                    }
                }
            }
            report.paths.push(path);
        }

        counter!(METRIC_INVALIDATED).increment(report.removed.len() as u64);
        info!(
            paths = report.paths.len(),
            removed = report.removed.len(),
            missing = report.missing,
            failed = report.failures.len(),
            "cache entries invalidated"
        );
        self.cache.notices().emit(CacheNotice::Invalidated {
            removed: report.removed.len(),
            failed: report.failures.len(),
        });

        report
    }

    /// Invalidate everything a content event affects.
    pub async fn handle(&self, event: &ContentEvent) -> InvalidationReport {
        let change = event.change();
        if change.revision {
            debug!(
                content_id = change.content_id,
                event_kind = event.label(),
                "revision or autosave; nothing to invalidate"
            );
            return InvalidationReport::default();
        }
        self.on_content_changed(change.affected_urls()).await
    }

    /// Administrative clear: drop every entry without computing keys.
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        self.cache.clear_all().await
    }
}

/// Path component of an absolute or site-relative URL, without query or fragment.
///
/// Both forms come back percent-encoded, the way request paths arrive.
pub fn request_path(url: &str) -> String {
    let url = url.trim();
    if let Some(parsed) = Url::parse(url).ok().filter(Url::has_host) {
        return parsed.path().to_string();
    }

    let relative = format!("/{}", url.trim_start_matches('/'));
    match Url::parse(RELATIVE_BASE).and_then(|base| base.join(&relative)) {
        Ok(resolved) => resolved.path().to_string(),
        Err(_) => strip_query(&relative).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::cache::config::CachePolicy;
    use crate::cache::device::DeviceClass;
    use crate::cache::eligibility::EligibilityGate;
    use crate::cache::events::ContentChange;
    use crate::cache::keys::build_key;
    use crate::cache::memory::MemoryStore;
    use crate::cache::store::{CacheBackend, EntryInfo};

    fn engine_over(store: Arc<dyn CacheBackend>) -> InvalidationEngine {
        let gate = EligibilityGate::new(Arc::new(CachePolicy::default()));
        InvalidationEngine::new(Arc::new(PageCache::new(gate, store)))
    }

    async fn seed(store: &MemoryStore, path: &str, device: DeviceClass) -> CacheKey {
        let key = build_key(path, device);
        store.write(&key, b"<html></html>").await.expect("seed");
        key
    }

    #[test]
    fn resolves_request_paths() {
        assert_eq!(request_path("https://example.com/blog/post-1?x=1"), "/blog/post-1");
        assert_eq!(request_path("https://example.com"), "/");
        assert_eq!(request_path("/category/news#top"), "/category/news");
        assert_eq!(request_path("tag/rust"), "/tag/rust");
        assert_eq!(request_path("//double/slash"), "/double/slash");
    }

    #[test]
    fn relative_and_absolute_urls_key_like_live_requests() {
        let served: axum::http::Uri = "/caf%C3%A9/menu?utm_source=x".parse().expect("uri");
        let live = build_key(served.path(), DeviceClass::Desktop);

        assert_eq!(request_path("/café/menu"), "/caf%C3%A9/menu");
        assert_eq!(
            build_key(&request_path("/café/menu"), DeviceClass::Desktop),
            live
        );
        assert_eq!(
            build_key(&request_path("https://example.com/café/menu"), DeviceClass::Desktop),
            live
        );
        assert_eq!(
            build_key(&request_path("/caf%C3%A9/menu"), DeviceClass::Desktop),
            live
        );
    }

    #[tokio::test]
    async fn removes_both_variants_of_each_url() {
        let store = Arc::new(MemoryStore::new());
        let desktop = seed(&store, "/blog/post-1", DeviceClass::Desktop).await;
        let mobile = seed(&store, "/blog/post-1", DeviceClass::Mobile).await;
        let home = seed(&store, "/", DeviceClass::Desktop).await;
        let untouched = seed(&store, "/about", DeviceClass::Desktop).await;

        let engine = engine_over(store.clone());
        let report = engine
            .on_content_changed(["https://example.com/blog/post-1", "/", "/blog/post-1"])
            .await;

        assert!(report.is_clean());
        assert_eq!(report.paths, vec!["/blog/post-1", "/"]);
        assert_eq!(report.removed, vec![desktop.clone(), mobile.clone(), home.clone()]);
        assert_eq!(report.missing, 1);
        assert!(!store.exists(&desktop).await);
        assert!(!store.exists(&mobile).await);
        assert!(!store.exists(&home).await);
        assert!(store.exists(&untouched).await);
    }

    #[tokio::test]
    async fn revisions_invalidate_nothing() {
        let store = Arc::new(MemoryStore::new());
        let key = seed(&store, "/blog/post-2", DeviceClass::Desktop).await;

        let engine = engine_over(store.clone());
        let event = ContentEvent::Updated(ContentChange::new(2, "/blog/post-2").as_revision());
        let report = engine.handle(&event).await;

        assert!(report.removed.is_empty());
        assert!(store.exists(&key).await);
    }

    #[tokio::test]
    async fn content_update_clears_post_home_and_archive() {
        let store = Arc::new(MemoryStore::new());
        let post = seed(&store, "/blog/post-1", DeviceClass::Desktop).await;
        let home = seed(&store, "/", DeviceClass::Desktop).await;
        let archive = seed(&store, "/category/news", DeviceClass::Desktop).await;

        let engine = engine_over(store.clone());
        let event = ContentEvent::Updated(
            ContentChange::new(1, "/blog/post-1").with_archives(["/category/news"]),
        );
        let report = engine.handle(&event).await;

        assert_eq!(report.removed.len(), 3);
        for key in [post, home, archive] {
            assert!(!store.exists(&key).await);
        }
    }

    /// Fails deletes for one key, delegates everything else.
    struct FlakyStore {
        inner: MemoryStore,
        broken: CacheKey,
    }

    #[async_trait]
    impl CacheBackend for FlakyStore {
        async fn exists(&self, key: &CacheKey) -> bool {
            self.inner.exists(key).await
        }
        async fn read(&self, key: &CacheKey) -> Result<Bytes, StoreError> {
            self.inner.read(key).await
        }
        async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
            self.inner.write(key, body).await
        }
        async fn delete(&self, key: &CacheKey) -> Result<Deleted, StoreError> {
            if *key == self.broken {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "denied",
                )));
            }
            self.inner.delete(key).await
        }
        async fn delete_all(&self) -> Result<usize, StoreError> {
            self.inner.delete_all().await
        }
        async fn age_seconds(&self, key: &CacheKey) -> Result<u64, StoreError> {
            self.inner.age_seconds(key).await
        }
        async fn list(&self) -> Result<Vec<EntryInfo>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let inner = MemoryStore::new();
        let broken = seed(&inner, "/blog/post-1", DeviceClass::Desktop).await;
        let home = seed(&inner, "/", DeviceClass::Desktop).await;
        let store = Arc::new(FlakyStore {
            inner,
            broken: broken.clone(),
        });

        let engine = engine_over(store.clone());
        let report = engine.on_content_changed(["/blog/post-1", "/"]).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, broken);
        assert_eq!(report.removed, vec![home.clone()]);
        assert!(store.exists(&broken).await);
        assert!(!store.exists(&home).await);
    }

    #[tokio::test]
    async fn clear_all_empties_the_store() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "/a", DeviceClass::Desktop).await;
        seed(&store, "/b", DeviceClass::Mobile).await;

        let engine = engine_over(store.clone());
        assert_eq!(engine.clear_all().await.expect("clear"), 2);
        assert!(store.is_empty());
    }
}
