//! Page cache middleware.
//!
//! Serves fresh entries before the handler runs. On a miss or expiry it lets
//! the handler render, runs the transform pipeline over HTML output and hands
//! the result to the write path when the response is a cacheable page.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use time::{OffsetDateTime, macros::format_description};
use tracing::{debug, instrument, warn};

use super::orchestrator::{Lookup, PageCache};
use super::request::RequestContext;
use crate::config::BrowserCacheSettings;
use crate::transform::TransformPipeline;

/// Largest rendered body the middleware buffers for transforms and storage.
const MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

/// Extensions that receive long-lived browser cache headers.
pub const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "jpg", "jpeg", "png", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot", "webp",
];

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub cache: Arc<PageCache>,
    pub pipeline: Arc<TransformPipeline>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let context = RequestContext::from_http(
        request.method(),
        request.uri(),
        request.headers(),
        state.cache.policy(),
    );

    let writable = match state.cache.lookup(&context).await {
        Lookup::Hit(page) => return page.into_response(),
        Lookup::Bypass(reason) => reason.allows_write(),
    };

    let response = next.run(request).await;

    if response.status() != StatusCode::OK || !is_html(response.headers()) {
        return response;
    }
    if !writable && state.pipeline.is_empty() {
        return response;
    }
    if declared_length(response.headers()).is_some_and(|length| length > MAX_BUFFERED_BODY) {
        debug!(cache = "page", "rendered page over buffer limit; passing through");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let html = match buffer_body(body, MAX_BUFFERED_BODY).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Passthrough(body) => return Response::from_parts(parts, body),
    };

    let html = match std::str::from_utf8(&html) {
        Ok(text) if !state.pipeline.is_empty() => state.pipeline.apply(text).into_bytes(),
        _ => html,
    };

    if writable && !parts.headers.contains_key(header::SET_COOKIE) {
        state.cache.store(&context, &html).await;
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Result of reading a rendered body for transforms and storage.
enum Buffered {
    Complete(Vec<u8>),
    /// Over the limit or failed mid-read: the chunks already read followed
    /// by the rest of the original stream.
    Passthrough(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                total += chunk.len();
                chunks.push(chunk);
                if total > limit {
                    debug!(cache = "page", limit, "rendered page over buffer limit; passing through");
                    let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return Buffered::Passthrough(Body::from_stream(head.chain(data)));
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to buffer rendered page");
                let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                return Buffered::Passthrough(Body::from_stream(head.chain(stream::once(
                    async move { Err(err) },
                ))));
            }
        }
    }

    let mut html = Vec::with_capacity(total);
    for chunk in chunks {
        html.extend_from_slice(&chunk);
    }
    Buffered::Complete(html)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

/// Browser cache policy for static assets.
#[derive(Debug, Clone, Copy)]
pub struct AssetCacheState {
    pub enabled: bool,
    pub max_age: Duration,
}

impl From<&BrowserCacheSettings> for AssetCacheState {
    fn from(settings: &BrowserCacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_age: settings.max_age,
        }
    }
}

/// Add `Cache-Control` and `Expires` to successful static asset responses.
pub async fn static_asset_headers(
    State(state): State<AssetCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_asset = state.enabled && is_static_asset(request.uri().path());
    let mut response = next.run(request).await;
    if !is_asset || !response.status().is_success() {
        return response;
    }

    let seconds = state.max_age.as_secs();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={seconds}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Some(value) = http_date(OffsetDateTime::now_utc() + state.max_age)
        .and_then(|date| HeaderValue::from_str(&date).ok())
    {
        headers.insert(header::EXPIRES, value);
    }
    response
}

pub fn is_static_asset(path: &str) -> bool {
    path.rsplit_once('.')
        .filter(|(_, ext)| !ext.contains('/'))
        .is_some_and(|(_, ext)| {
            STATIC_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn http_date(at: OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC).format(&format).ok()
}
