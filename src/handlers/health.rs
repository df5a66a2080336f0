use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{
    error::{AppError, Result},
    repositories::visits,
    state::AppState,
};

/// Liveness plus the number of jobs waiting on the queue.
pub async fn health(State(state): State<AppState>) -> Response {
    let body = sonic_rs::to_string(&sonic_rs::json!({
        "status": "ok",
        "queuedJobs": state.attendance.queue().queued(),
        "portalPermits": state.portal_limiter.available_permits(),
    }))
    .unwrap_or_else(|_| r#"{"status":"ok"}"#.to_string());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Number of live fetches served today.
pub async fn today_visits(State(state): State<AppState>) -> Result<Response> {
    let count = visits::today_count(&state.redis).await?;

    let response = sonic_rs::to_string(&sonic_rs::json!({
        "todayLogins": count,
    }))
    .map_err(|e| AppError::Serialization(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
        .into_response())
}
