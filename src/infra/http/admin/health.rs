use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{application::error::ErrorReport, cache::is_cache_working};

use super::AdminState;

pub(super) async fn cache_health(State(state): State<AdminState>) -> Response {
    if is_cache_working(&state.layout).await {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    ErrorReport::from_message(
        "infra::http::admin::cache_health",
        StatusCode::SERVICE_UNAVAILABLE,
        format!(
            "cache self-test failed under {}",
            state.layout.root().display()
        ),
    )
    .attach(&mut response);
    response
}
