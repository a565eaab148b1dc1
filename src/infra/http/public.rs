use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{
        HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::{AppError, ErrorReport},
        render::{PageRenderer, RenderError, RenderedPage},
    },
    cache::{AssetCacheState, CacheState, HTML_CONTENT_TYPE, page_cache_layer, static_asset_headers},
};

use super::middleware::{log_responses, set_request_context};

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Not Found</title></head>\n<body><h1>Not Found</h1><p>The requested page does not exist.</p></body>\n</html>\n";

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<dyn PageRenderer>,
}

impl HttpState {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }
}

pub fn build_router(state: HttpState, cache: Option<CacheState>, assets: AssetCacheState) -> Router {
    let pages = Router::new()
        .route("/", get(render_page))
        .route("/{*path}", get(render_page))
        .with_state(state);

    let pages = match cache {
        Some(cache_state) => {
            pages.layer(middleware::from_fn_with_state(cache_state, page_cache_layer))
        }
        None => pages,
    };

    Router::new()
        .route("/_health", get(public_health))
        .merge(pages)
        .layer(middleware::from_fn_with_state(assets, static_asset_headers))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn render_page(State(state): State<HttpState>, uri: Uri) -> Response {
    match state.renderer.render(uri.path()).await {
        Ok(page) => page_response(page),
        Err(err @ (RenderError::NotFound(_) | RenderError::InvalidPath(_))) => {
            not_found_response(&err)
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

fn page_response(page: RenderedPage) -> Response {
    let content_type = HeaderValue::from_str(&page.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Body::from(page.body));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn not_found_response(err: &RenderError) -> Response {
    let mut response = (
        StatusCode::NOT_FOUND,
        [
            (CONTENT_TYPE, HTML_CONTENT_TYPE),
            (CACHE_CONTROL, "no-store"),
        ],
        NOT_FOUND_PAGE,
    )
        .into_response();
    ErrorReport::from_error("infra::http::public::render_page", StatusCode::NOT_FOUND, err)
        .attach(&mut response);
    response
}

async fn public_health() -> StatusCode {
    StatusCode::NO_CONTENT
}
