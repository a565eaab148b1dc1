//! Presto page cache.
//!
//! Rendered pages are stored as flat HTML files keyed by path and device
//! class, served directly while fresh, and removed when the content behind
//! them changes:
//!
//! - [`EligibilityGate`] decides whether a request may use the cache at all.
//! - [`PageCache`] runs the read path before rendering and the write path after.
//! - [`InvalidationEngine`] deletes entries for changed URLs; [`CacheTrigger`]
//!   feeds it content events.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! lifetime_seconds = 3600
//! mobile_separate = false
//! exclude_urls = ["/members"]
//! ```

mod config;
mod device;
mod eligibility;
mod events;
mod invalidation;
mod keys;
mod lock;
mod memory;
mod middleware;
mod orchestrator;
mod request;
mod stats;
mod store;
mod trigger;
mod validate;

pub use config::{CachePolicy, DEFAULT_EXCLUDED_PATTERNS, TRACKING_PARAMS};
pub(crate) use config::{
    DEFAULT_LIFETIME_SECS, DEFAULT_MIN_BODY_BYTES, DEFAULT_SESSION_COOKIE_PREFIX,
};
pub use device::DeviceClass;
pub use eligibility::{CacheVeto, EligibilityGate, Ineligible};
pub use events::{
    CacheEvent, CacheNotice, ContentChange, ContentEvent, Epoch, EventQueue, NoticeBus,
};
pub use invalidation::{
    InvalidationEngine, InvalidationFailure, InvalidationReport, request_path,
};
pub use keys::{CacheKey, MAX_SLUG_LEN, build_key, strip_query, variant_keys};
pub use memory::MemoryStore;
pub use middleware::{
    AssetCacheState, CacheState, STATIC_EXTENSIONS, is_static_asset, page_cache_layer,
    static_asset_headers,
};
pub use orchestrator::{
    BypassReason, CACHE_AGE_HEADER, CACHE_STATUS_HEADER, CachedPage, HTML_CONTENT_TYPE, Lookup,
    PageCache, StoreOutcome, is_expired,
};
pub use request::{RequestContext, Surface};
pub use stats::{CacheStats, format_bytes, is_cache_working};
pub use store::{CacheBackend, CacheLayout, Deleted, EntryInfo, FsStore, StoreError};
pub use trigger::CacheTrigger;
pub use validate::{Rejection, is_served_from_cache, provenance_trailer, validate_body};
