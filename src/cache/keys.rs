//! Cache key derivation.
//!
//! A [`CacheKey`] is `{slug}-{md5(path)}` with `-mobile` appended for the
//! mobile variant. The slug keeps entries navigable on disk; the digest keeps
//! paths that sanitize to the same slug (`/a/b` and `/a-b`) apart.

use std::fmt;

use md5::{Digest, Md5};
use serde::Serialize;

use super::device::DeviceClass;

/// Maximum length of the human-readable slug segment.
pub const MAX_SLUG_LEN: usize = 200;

const INDEX_SLUG: &str = "index";
const MOBILE_SUFFIX: &str = "-mobile";
const ENTRY_EXTENSION: &str = "html";

/// Filesystem-safe identifier for one stored page variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the entry inside the page-body directory.
    pub fn file_name(&self) -> String {
        format!("{}.{ENTRY_EXTENSION}", self.0)
    }

    /// Whether this key addresses the mobile variant.
    pub fn is_mobile(&self) -> bool {
        self.0.ends_with(MOBILE_SUFFIX)
    }

    /// Recover a key from an entry file name produced by [`CacheKey::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".html")?;
        is_key_safe(stem).then(|| Self(stem.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request target and device class.
///
/// Total over any input: the query string is dropped, the digest covers the
/// exact remaining path, and an empty slug falls back to `index`.
pub fn build_key(path: &str, device: DeviceClass) -> CacheKey {
    let path = strip_query(path);
    let digest = hex::encode(Md5::digest(path.as_bytes()));

    let mut key = format!("{}-{digest}", slugify_path(path));
    if device == DeviceClass::Mobile {
        key.push_str(MOBILE_SUFFIX);
    }
    CacheKey(key)
}

/// Desktop and mobile keys for a path, in that order.
pub fn variant_keys(path: &str) -> [CacheKey; 2] {
    [
        build_key(path, DeviceClass::Desktop),
        build_key(path, DeviceClass::Mobile),
    ]
}

/// Drop everything from the first `?` (and any `#fragment`).
pub fn strip_query(target: &str) -> &str {
    let end = target.find(['?', '#']).unwrap_or(target.len());
    &target[..end]
}

fn slugify_path(path: &str) -> String {
    let lowered = path.to_ascii_lowercase();
    let trimmed = lowered.trim_matches('/');

    let mut slug = String::with_capacity(trimmed.len());
    let mut in_separator_run = false;
    for ch in trimmed.chars() {
        // `-`, `/` and anything outside [a-z0-9_] collapse into one `-`.
        if !matches!(ch, 'a'..='z' | '0'..='9' | '_') {
            if !in_separator_run {
                slug.push('-');
            }
            in_separator_run = true;
        } else {
            slug.push(ch);
            in_separator_run = false;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        INDEX_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

fn is_key_safe(stem: &str) -> bool {
    !stem.is_empty()
        && stem
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md5_hex(input: &str) -> String {
        hex::encode(Md5::digest(input.as_bytes()))
    }

    #[test]
    fn key_is_deterministic() {
        let first = build_key("/blog/post-1", DeviceClass::Desktop);
        let second = build_key("/blog/post-1", DeviceClass::Desktop);
        assert_eq!(first, second);
    }

    #[test]
    fn collapsing_paths_are_disambiguated_by_digest() {
        let nested = build_key("/a/b", DeviceClass::Desktop);
        let dashed = build_key("/a-b", DeviceClass::Desktop);

        assert!(nested.as_str().starts_with("a-b-"));
        assert!(dashed.as_str().starts_with("a-b-"));
        assert_ne!(nested, dashed);
    }

    #[test]
    fn query_string_is_ignored() {
        let plain = build_key("/blog/post-1", DeviceClass::Desktop);
        let tracked = build_key("/blog/post-1?utm_source=x", DeviceClass::Desktop);
        assert_eq!(plain, tracked);
        assert_eq!(
            plain.as_str(),
            format!("blog-post-1-{}", md5_hex("/blog/post-1"))
        );
    }

    #[test]
    fn root_and_empty_paths_fall_back_to_index() {
        let root = build_key("/", DeviceClass::Desktop);
        assert_eq!(root.as_str(), format!("index-{}", md5_hex("/")));

        let empty = build_key("", DeviceClass::Desktop);
        assert_eq!(empty.as_str(), format!("index-{}", md5_hex("")));

        let punctuation = build_key("/!!!/", DeviceClass::Desktop);
        assert!(punctuation.as_str().starts_with("index-"));
    }

    #[test]
    fn mobile_variant_gets_suffix() {
        let key = build_key("/", DeviceClass::Mobile);
        assert!(key.is_mobile());
        assert_eq!(key.file_name(), format!("index-{}-mobile.html", md5_hex("/")));
    }

    #[test]
    fn slug_is_lowercased_and_sanitized() {
        let key = build_key("/Blog/Hello World!/", DeviceClass::Desktop);
        assert!(key.as_str().starts_with("blog-hello-world-"));
    }

    #[test]
    fn slug_is_bounded() {
        let long = format!("/{}", "x".repeat(500));
        let key = build_key(&long, DeviceClass::Desktop);
        let (slug, _) = key.as_str().rsplit_once('-').expect("digest separator");
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn file_name_round_trips() {
        let key = build_key("/docs/intro", DeviceClass::Mobile);
        let parsed = CacheKey::from_file_name(&key.file_name()).expect("valid entry name");
        assert_eq!(parsed, key);

        assert!(CacheKey::from_file_name("index.php").is_none());
        assert!(CacheKey::from_file_name("../etc.html").is_none());
    }

    #[test]
    fn variant_keys_cover_both_devices() {
        let [desktop, mobile] = variant_keys("/blog/post-1");
        assert!(!desktop.is_mobile());
        assert!(mobile.is_mobile());
        assert_eq!(format!("{desktop}-mobile"), mobile.as_str());
    }
}
