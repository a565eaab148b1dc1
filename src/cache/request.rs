//! Per-request context consulted by the eligibility gate and key builder.

use axum::http::{HeaderMap, Method, Uri, header};
use url::form_urlencoded;

use super::config::CachePolicy;
use super::device::{DeviceClass, parse_mobile_hint};

const MOBILE_HINT_HEADER: &str = "sec-ch-ua-mobile";
const REQUESTED_WITH_HEADER: &str = "x-requested-with";

/// Which part of the site a request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Surface {
    #[default]
    Public,
    Admin,
    Api,
    Background,
}

impl Surface {
    /// Classify a request from its path and headers.
    pub fn classify(path: &str, headers: &HeaderMap) -> Self {
        if path.contains("wp-cron.php") {
            return Self::Background;
        }
        if path.starts_with("/wp-admin") || path == "/admin" || path.starts_with("/admin/") {
            if path.ends_with("admin-ajax.php") {
                return Self::Api;
            }
            return Self::Admin;
        }
        if path.starts_with("/wp-json") || path == "/api" || path.starts_with("/api/") {
            return Self::Api;
        }
        let ajax = headers
            .get(REQUESTED_WITH_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("xmlhttprequest"));
        if ajax { Self::Api } else { Self::Public }
    }
}

/// Everything the cache needs to know about one incoming request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Client submitted a request body (form fields or otherwise).
    pub has_body: bool,
    pub user_agent: Option<String>,
    /// Value of the `Sec-CH-UA-Mobile` client hint, when sent.
    pub mobile_hint: Option<bool>,
    pub authenticated: bool,
    pub surface: Surface,
    /// The rendered response turned out to be a not-found page.
    pub not_found: bool,
    /// The request is a search-results page.
    pub search: bool,
}

impl RequestContext {
    /// An anonymous public `GET` for `target` (`/path?query`).
    pub fn get(target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: Method::GET,
            search: is_search(&path, query.as_deref()),
            path,
            query,
            has_body: false,
            user_agent: None,
            mobile_hint: None,
            authenticated: false,
            surface: Surface::Public,
            not_found: false,
        }
    }

    /// Build the context from the parts of an HTTP request.
    pub fn from_http(method: &Method, uri: &Uri, headers: &HeaderMap, policy: &CachePolicy) -> Self {
        let path = uri.path().to_string();
        let query = uri.query().map(str::to_string);

        let has_body = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .is_some_and(|length| length > 0)
            || headers.contains_key(header::TRANSFER_ENCODING);

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mobile_hint = headers
            .get(MOBILE_HINT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_mobile_hint);

        Self {
            method: method.clone(),
            surface: Surface::classify(&path, headers),
            search: is_search(&path, query.as_deref()),
            authenticated: has_session_cookie(headers, &policy.session_cookie_prefixes),
            path,
            query,
            has_body,
            user_agent,
            mobile_hint,
            not_found: false,
        }
    }

    /// Path plus `?query`, as received; exclusion patterns match against this.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// Sanitized names of every query parameter, in order of appearance.
    pub fn query_param_names(&self) -> Vec<String> {
        let Some(query) = self.query.as_deref() else {
            return Vec::new();
        };
        form_urlencoded::parse(query.as_bytes())
            .map(|(name, _)| sanitize_param_name(&name))
            .collect()
    }

    pub fn device(&self, policy: &CachePolicy) -> DeviceClass {
        DeviceClass::detect(
            self.mobile_hint,
            self.user_agent.as_deref(),
            policy.mobile_separate,
        )
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

fn is_search(path: &str, query: Option<&str>) -> bool {
    if path == "/search" || path.starts_with("/search/") {
        return true;
    }
    query.is_some_and(|query| {
        form_urlencoded::parse(query.as_bytes()).any(|(name, _)| name == "s")
    })
}

/// Lowercase and keep only `[a-z0-9_-]`.
fn sanitize_param_name(name: &str) -> String {
    name.chars()
        .map(|ch| ch.to_ascii_lowercase())
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '_' || *ch == '-')
        .collect()
}

fn has_session_cookie(headers: &HeaderMap, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return false;
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
        .any(|name| {
            prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
        })
}
