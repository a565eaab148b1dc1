use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    application::error::{AppError, HttpError},
    cache::{CacheStats, ContentEvent, InvalidationReport},
};

use super::AdminState;

#[derive(Debug, Serialize)]
struct ClearedView {
    removed: usize,
}

#[derive(Debug, Deserialize)]
pub(super) struct InvalidateRequest {
    urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatsView {
    #[serde(flatten)]
    stats: CacheStats,
    size_human: String,
}

pub(super) async fn clear_cache(State(state): State<AdminState>) -> Response {
    match state.trigger.engine().clear_all().await {
        Ok(removed) => Json(ClearedView { removed }).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

pub(super) async fn invalidate_urls(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    let urls: Vec<&str> = request
        .urls
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return AppError::validation("`urls` must contain at least one URL").into_response();
    }

    let report = state.trigger.engine().on_content_changed(urls).await;
    Json(report).into_response()
}

pub(super) async fn content_event(
    State(state): State<AdminState>,
    Json(event): Json<ContentEvent>,
) -> Json<InvalidationReport> {
    info!(
        event_kind = event.label(),
        content_id = event.change().content_id,
        "content event received"
    );
    Json(state.trigger.trigger(event, true).await)
}

pub(super) async fn cache_stats(State(state): State<AdminState>) -> Response {
    match CacheStats::collect(&state.layout).await {
        Ok(stats) => {
            let size_human = stats.size_human();
            Json(StatsView { stats, size_human }).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}
