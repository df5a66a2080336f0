use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

/// Lets a request through only when it carries `Authorization: Bearer <ADMIN_TOKEN>`.
///
/// With no token configured every request is refused.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    let expected = state.admin_token.as_deref().map(|token| token.as_str());

    if !token_matches(expected, presented) {
        tracing::warn!(path = %req.uri().path(), "Admin route called without a valid token");
        return AppError::Unauthorized(format!("{} needs the admin token", req.uri().path()))
            .into_response();
    }

    next.run(req).await
}

fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn token_matches(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) => {
            expected.as_bytes().ct_eq(presented.as_bytes()).into()
        }
        _ => false,
    }
}
