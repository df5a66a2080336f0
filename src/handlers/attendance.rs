use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::{attendance::FetchResult, credentials::Credentials},
    repositories::visits,
    state::AppState,
    validation::credentials::*,
};

/// The request payload for a single attendance fetch.
#[derive(Deserialize)]
pub struct AttendanceRequest {
    pub username: String,
    pub password: String,
}

/// The request payload for a batch refresh of named users.
#[derive(Deserialize, Debug)]
pub struct BatchRequest {
    pub usernames: Vec<String>,
}

/// A fetch result plus whether it was served from the store.
#[derive(Serialize)]
pub struct AttendanceResponse {
    #[serde(flatten)]
    pub result: FetchResult,
    pub cached: bool,
}

/// Fetches attendance for one student, from the store when fresh.
pub async fn get_attendance(
    State(state): State<AppState>,
    Json(payload): Json<AttendanceRequest>,
) -> Result<Response> {
    validate_identifier(&payload.username)?;
    validate_secret(&payload.password)?;

    let credentials = Credentials::new(payload.username, payload.password);
    let lookup = state.attendance.get_attendance(credentials).await?;

    if !lookup.cached {
        if let Err(e) = visits::record_visit(&state.redis).await {
            tracing::warn!("Failed to record visit: {}", e);
        }
    }

    let response = AttendanceResponse {
        result: lookup.result,
        cached: lookup.cached,
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Re-fetches the named users with the credentials on record.
pub async fn run_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Response> {
    validate_batch(&payload.usernames)?;

    let report = state
        .attendance
        .refresh_batch(Some(&payload.usernames))
        .await?;

    Ok((StatusCode::OK, Json(report)).into_response())
}

/// Re-fetches every stored user.
pub async fn refresh_all(State(state): State<AppState>) -> Result<Response> {
    let report = state.attendance.refresh_batch(None).await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
