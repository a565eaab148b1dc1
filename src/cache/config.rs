//! Page cache policy.
//!
//! Built once from `presto.toml` and shared read-only for the life of the
//! process; changes take effect on the next load.

use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_LIFETIME_SECS: u64 = 3600;
pub(crate) const DEFAULT_MIN_BODY_BYTES: usize = 255;
pub(crate) const DEFAULT_SESSION_COOKIE_PREFIX: &str = "logged_in";

/// Request-target fragments that are never cached, regardless of user patterns.
pub const DEFAULT_EXCLUDED_PATTERNS: &[&str] = &[
    "/wp-admin",
    "/wp-login",
    "/wp-json",
    "/xmlrpc.php",
    "/feed",
    "/cart",
    "/checkout",
    "/my-account",
    "?s=",
    "/preview=",
    "/wp-cron.php",
];

/// Campaign-tracking query parameters that do not disqualify a request.
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// Page cache settings consulted by the gate, orchestrator and invalidation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Master switch for reading and writing the page cache.
    pub page_cache_enabled: bool,
    /// Store a separate variant for mobile clients.
    pub mobile_separate: bool,
    /// Entries at or past this age are expired.
    pub lifetime_seconds: u64,
    /// User-supplied substring patterns, merged with [`DEFAULT_EXCLUDED_PATTERNS`].
    pub excluded_url_patterns: Vec<String>,
    /// Serve and store pages for authenticated callers too.
    pub cache_logged_in_users: bool,
    /// Cookie-name prefixes that identify an authenticated caller.
    pub session_cookie_prefixes: Vec<String>,
    /// Rendered bodies shorter than this are never stored.
    pub min_body_bytes: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            page_cache_enabled: true,
            mobile_separate: false,
            lifetime_seconds: DEFAULT_LIFETIME_SECS,
            excluded_url_patterns: Vec::new(),
            cache_logged_in_users: false,
            session_cookie_prefixes: vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()],
            min_body_bytes: DEFAULT_MIN_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CachePolicy {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            page_cache_enabled: settings.enabled,
            mobile_separate: settings.mobile_separate,
            lifetime_seconds: settings.lifetime.as_secs(),
            excluded_url_patterns: settings.exclude_urls.clone(),
            cache_logged_in_users: settings.cache_logged_in,
            session_cookie_prefixes: settings.session_cookie_prefixes.clone(),
            min_body_bytes: settings.min_body_bytes,
        }
    }
}

impl CachePolicy {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds)
    }

    /// Defaults followed by user patterns; blank patterns never match.
    pub fn excluded_patterns(&self) -> impl Iterator<Item = &str> {
        DEFAULT_EXCLUDED_PATTERNS
            .iter()
            .copied()
            .chain(self.excluded_url_patterns.iter().map(String::as_str))
            .filter(|pattern| !pattern.is_empty())
    }
}
