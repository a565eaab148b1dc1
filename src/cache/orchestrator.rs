//! Cache orchestrator.
//!
//! Two independent paths per request. The read path runs before rendering
//! and either answers from a fresh entry or lets the request through; the
//! write path runs after a live render and stores the body when the read
//! path found nothing usable.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::config::CachePolicy;
use super::eligibility::{EligibilityGate, Ineligible};
use super::events::{CacheNotice, NoticeBus};
use super::keys::{CacheKey, build_key};
use super::request::RequestContext;
use super::store::{CacheBackend, StoreError};
use super::validate::{Rejection, validate_body, with_trailer};

pub const CACHE_STATUS_HEADER: &str = "x-presto-cache";
pub const CACHE_AGE_HEADER: &str = "x-cache-age";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

const METRIC_HIT: &str = "presto_page_cache_hit_total";
const METRIC_MISS: &str = "presto_page_cache_miss_total";
const METRIC_EXPIRED: &str = "presto_page_cache_expired_total";
const METRIC_BYPASS: &str = "presto_page_cache_bypass_total";
const METRIC_WRITE: &str = "presto_page_cache_write_total";
const METRIC_WRITE_FAILED: &str = "presto_page_cache_write_failed_total";
const METRIC_LOOKUP_MS: &str = "presto_page_cache_lookup_ms";

/// Why the read path let a request through to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Ineligible(Ineligible),
    Miss,
    Expired,
}

impl BypassReason {
    /// Only absence of a usable entry hands the request on to the write path.
    pub fn allows_write(self) -> bool {
        matches!(self, Self::Miss | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ineligible(reason) => reason.as_str(),
            Self::Miss => "miss",
            Self::Expired => "expired",
        }
    }
}

/// A fresh entry ready to be sent.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub key: CacheKey,
    pub body: Bytes,
    pub age_seconds: u64,
    pub lifetime_seconds: u64,
    /// Send headers only.
    pub head_only: bool,
}

impl CachedPage {
    pub fn remaining_seconds(&self) -> u64 {
        self.lifetime_seconds.saturating_sub(self.age_seconds)
    }
}

impl IntoResponse for CachedPage {
    fn into_response(self) -> Response {
        let remaining = self.remaining_seconds();
        let length = self.body.len();
        let body = if self.head_only {
            Body::empty()
        } else {
            Body::from(self.body)
        };
        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        headers.insert(CACHE_AGE_HEADER, HeaderValue::from(self.age_seconds));
        if let Ok(value) =
            HeaderValue::from_str(&format!("public, max-age={remaining}"))
        {
            headers.insert(header::CACHE_CONTROL, value);
        }
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(HTML_CONTENT_TYPE),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        response
    }
}

/// Outcome of the read path.
#[derive(Debug)]
pub enum Lookup {
    Hit(CachedPage),
    Bypass(BypassReason),
}

/// Outcome of the write path. None of these is an error for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(CacheKey),
    Skipped(Ineligible),
    Rejected(Rejection),
    Failed,
}

/// Entries at or past the lifetime are expired.
pub fn is_expired(age_seconds: u64, lifetime_seconds: u64) -> bool {
    age_seconds >= lifetime_seconds
}

/// Read and write paths over one store and one rule set.
pub struct PageCache {
    gate: EligibilityGate,
    store: Arc<dyn CacheBackend>,
    notices: NoticeBus,
}

impl PageCache {
    pub fn new(gate: EligibilityGate, store: Arc<dyn CacheBackend>) -> Self {
        Self {
            gate,
            store,
            notices: NoticeBus::new(),
        }
    }

    pub fn with_notices(mut self, notices: NoticeBus) -> Self {
        self.notices = notices;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        self.gate.policy()
    }

    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.store
    }

    pub fn notices(&self) -> &NoticeBus {
        &self.notices
    }

    pub fn key_for(&self, request: &RequestContext) -> CacheKey {
        build_key(&request.path, request.device(self.policy()))
    }

    /// Read path.
    pub async fn lookup(&self, request: &RequestContext) -> Lookup {
        let started = Instant::now();
        let outcome = self.lookup_inner(request).await;
        histogram!(METRIC_LOOKUP_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        match &outcome {
            Lookup::Hit(page) => {
                counter!(METRIC_HIT).increment(1);
                debug!(
                    cache = "page",
                    outcome = "hit",
                    key = %page.key,
                    age = page.age_seconds,
                    "serving cached page"
                );
            }
            Lookup::Bypass(reason @ BypassReason::Ineligible(_)) => {
                counter!(METRIC_BYPASS, "reason" => reason.as_str()).increment(1);
                debug!(cache = "page", outcome = "bypass", reason = reason.as_str(), "request not cacheable");
            }
            Lookup::Bypass(BypassReason::Miss) => {
                counter!(METRIC_MISS).increment(1);
                debug!(cache = "page", outcome = "miss", path = %request.path, "cache miss");
            }
            Lookup::Bypass(BypassReason::Expired) => {
                counter!(METRIC_EXPIRED).increment(1);
                debug!(cache = "page", outcome = "expired", path = %request.path, "cache entry expired");
            }
        }

        outcome
    }

    async fn lookup_inner(&self, request: &RequestContext) -> Lookup {
        if let Err(reason) = self.gate.evaluate(request) {
            return Lookup::Bypass(BypassReason::Ineligible(reason));
        }

        let key = self.key_for(request);
        if !self.store.exists(&key).await {
            return Lookup::Bypass(BypassReason::Miss);
        }

        let age_seconds = match self.store.age_seconds(&key).await {
            Ok(age) => age,
            Err(StoreError::NotFound) => return Lookup::Bypass(BypassReason::Miss),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to stat cache entry");
                return Lookup::Bypass(BypassReason::Miss);
            }
        };

        let lifetime_seconds = self.policy().lifetime_seconds;
        if is_expired(age_seconds, lifetime_seconds) {
            if let Err(err) = self.store.delete(&key).await {
                warn!(key = %key, error = %err, "failed to delete expired cache entry");
            }
            return Lookup::Bypass(BypassReason::Expired);
        }

        match self.store.read(&key).await {
            Ok(body) => Lookup::Hit(CachedPage {
                key,
                body,
                age_seconds,
                lifetime_seconds,
                head_only: request.method == Method::HEAD,
            }),
            // Removed between the stat and the read.
            Err(StoreError::NotFound) => Lookup::Bypass(BypassReason::Miss),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read cache entry");
                Lookup::Bypass(BypassReason::Miss)
            }
        }
    }

    /// Write path: re-check eligibility, validate, append the trailer, store.
    pub async fn store(&self, request: &RequestContext, body: &[u8]) -> StoreOutcome {
        if request.method != Method::GET {
            return StoreOutcome::Skipped(Ineligible::Method);
        }
        if let Err(reason) = self.gate.evaluate(request) {
            debug!(cache = "page", reason = reason.as_str(), "write skipped");
            return StoreOutcome::Skipped(reason);
        }
        if let Err(rejection) = validate_body(body, self.policy().min_body_bytes) {
            debug!(
                cache = "page",
                path = %request.path,
                reason = rejection.as_str(),
                "rendered body not stored"
            );
            return StoreOutcome::Rejected(rejection);
        }

        let key = self.key_for(request);
        let stored = with_trailer(body, OffsetDateTime::now_utc());

        match self.store.write(&key, &stored).await {
            Ok(()) => {
                counter!(METRIC_WRITE).increment(1);
                debug!(cache = "page", key = %key, bytes = stored.len(), "page stored");
                self.notices.emit(CacheNotice::EntryWritten {
                    key: key.clone(),
                    size_bytes: stored.len(),
                });
                StoreOutcome::Stored(key)
            }
            Err(err) => {
                counter!(METRIC_WRITE_FAILED).increment(1);
                warn!(cache = "page", key = %key, error = %err, "failed to store page");
                StoreOutcome::Failed
            }
        }
    }

    /// Remove every entry regardless of key.
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        let removed = self.store.delete_all().await?;
        info!(removed, "page cache cleared");
        self.notices.emit(CacheNotice::ClearedAll { removed });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::cache::device::DeviceClass;
    use crate::cache::memory::MemoryStore;
    use crate::cache::validate::is_served_from_cache;

    fn page_body() -> Vec<u8> {
        format!(
            "<!DOCTYPE html><html><body><h1>Post</h1>{}</body></html>",
            "lorem ipsum ".repeat(40)
        )
        .into_bytes()
    }

    fn cache_with(policy: CachePolicy) -> (PageCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gate = EligibilityGate::new(Arc::new(policy));
        (PageCache::new(gate, store.clone()), store)
    }

    fn cache() -> (PageCache, Arc<MemoryStore>) {
        cache_with(CachePolicy::default())
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        assert!(!is_expired(3599, 3600));
        assert!(is_expired(3600, 3600));
        assert!(is_expired(7200, 3600));
    }

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let (cache, _) = cache();
        let request = RequestContext::get("/blog/post-1");

        let Lookup::Bypass(reason) = cache.lookup(&request).await else {
            panic!("first lookup must miss");
        };
        assert_eq!(reason, BypassReason::Miss);
        assert!(reason.allows_write());

        let key = build_key("/blog/post-1", DeviceClass::Desktop);
        assert_eq!(
            cache.store(&request, &page_body()).await,
            StoreOutcome::Stored(key.clone())
        );

        let Lookup::Hit(page) = cache.lookup(&request).await else {
            panic!("second lookup must hit");
        };
        assert_eq!(page.key, key);
        assert!(page.body.starts_with(&page_body()));
        assert!(is_served_from_cache(&page.body));
    }

    #[tokio::test]
    async fn entry_at_lifetime_is_expired_and_deleted() {
        let (cache, store) = cache_with(CachePolicy {
            lifetime_seconds: 60,
            ..Default::default()
        });
        let request = RequestContext::get("/about");
        cache.store(&request, &page_body()).await;

        let key = cache.key_for(&request);
        assert!(store.backdate(&key, 60));

        assert!(matches!(
            cache.lookup(&request).await,
            Lookup::Bypass(BypassReason::Expired)
        ));
        assert!(!store.exists(&key).await);
    }

    #[tokio::test]
    async fn ineligible_requests_never_touch_the_store() {
        let (cache, store) = cache();
        let request = RequestContext::get("/blog/post-1?ref=newsletter");

        let Lookup::Bypass(reason) = cache.lookup(&request).await else {
            panic!("must bypass");
        };
        assert_eq!(reason, BypassReason::Ineligible(Ineligible::QueryParams));
        assert!(!reason.allows_write());

        assert_eq!(
            cache.store(&request, &page_body()).await,
            StoreOutcome::Skipped(Ineligible::QueryParams)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn short_bodies_are_not_stored() {
        let (cache, store) = cache();
        let request = RequestContext::get("/tiny");

        let outcome = cache.store(&request, b"<html><body>hi</body></html>").await;
        assert!(matches!(
            outcome,
            StoreOutcome::Rejected(Rejection::TooSmall { .. })
        ));
        assert!(!store.exists(&cache.key_for(&request)).await);
    }

    #[tokio::test]
    async fn storage_failures_are_swallowed() {
        let (cache, store) = cache();
        store.set_fail_writes(true);

        let outcome = cache.store(&RequestContext::get("/ro"), &page_body()).await;
        assert_eq!(outcome, StoreOutcome::Failed);
    }

    #[tokio::test]
    async fn head_requests_read_but_never_write() {
        let (cache, _) = cache();
        let head = RequestContext::get("/head").with_method(Method::HEAD);

        assert_eq!(
            cache.store(&head, &page_body()).await,
            StoreOutcome::Skipped(Ineligible::Method)
        );

        cache.store(&RequestContext::get("/head"), &page_body()).await;
        let Lookup::Hit(page) = cache.lookup(&head).await else {
            panic!("head must hit");
        };
        assert!(page.head_only);

        let response = page.into_response();
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn hit_response_carries_cache_headers() {
        let page = CachedPage {
            key: build_key("/", DeviceClass::Desktop),
            body: Bytes::from_static(b"<html></html>"),
            age_seconds: 100,
            lifetime_seconds: 3600,
            head_only: false,
        };
        let response = page.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
        assert_eq!(response.headers()[CACHE_AGE_HEADER], "100");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=3500"
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn store_and_clear_emit_notices() {
        let (cache, _) = cache();
        let mut notices = cache.notices().subscribe();
        let request = RequestContext::get("/notify");

        cache.store(&request, &page_body()).await;
        assert!(matches!(
            notices.recv().await.expect("notice"),
            CacheNotice::EntryWritten { .. }
        ));

        assert_eq!(cache.clear_all().await.expect("clear"), 1);
        assert_eq!(
            notices.recv().await.expect("notice"),
            CacheNotice::ClearedAll { removed: 1 }
        );
    }
}
