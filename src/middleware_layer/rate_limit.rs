use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sonic_rs::JsonValueTrait;

use crate::{error::AppError, state::AppState};

/// Rejected logins allowed per username inside one window.
const MAX_FAILED_ATTEMPTS: i64 = 5;
/// Window length in seconds.
const ATTEMPT_WINDOW_SECS: i64 = 900;
/// Largest body read while looking for the username.
const MAX_BODY_BYTES: usize = 64 * 1024;

fn attempt_key(username: &str) -> String {
    format!("rate_limit:attendance:{}", username)
}

fn extract_username_from_body(body_bytes: &[u8]) -> Option<String> {
    let json = sonic_rs::from_slice::<sonic_rs::Value>(body_bytes).ok()?;
    json.get("username")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// A middleware that stops repeated rejected-credential attempts per username.
///
/// Only responses the portal refused (401) count; a success clears the counter.
pub async fn rate_limit_attendance(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::Validation("Request body too large".to_string()).into_response();
        }
    };

    let Some(username) = extract_username_from_body(&body_bytes) else {
        // Nothing to key on; the handler rejects the payload itself.
        return next.run(Request::from_parts(parts, Body::from(body_bytes))).await;
    };
    let key = attempt_key(&username);

    let count: Option<i64> = redis::cmd("GET")
        .arg(&key)
        .query_async(&mut state.redis.clone())
        .await
        .unwrap_or(None);

    if let Some(attempts) = count {
        if attempts >= MAX_FAILED_ATTEMPTS {
            let ttl: Option<i64> = redis::cmd("TTL")
                .arg(&key)
                .query_async(&mut state.redis.clone())
                .await
                .unwrap_or(None);

            tracing::warn!(username = %username, attempts, "Attendance attempts blocked");
            return AppError::RateLimitExceeded(format!(
                "Too many rejected attempts. Try again in {} minutes",
                ttl.unwrap_or(0).max(60) / 60
            ))
            .into_response();
        }
    }

    let response = next
        .run(Request::from_parts(parts, Body::from(body_bytes)))
        .await;

    if response.status() == StatusCode::UNAUTHORIZED {
        let attempts: i64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut state.redis.clone())
            .await
            .unwrap_or(0);

        // The window starts at the first failure.
        if attempts == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ATTEMPT_WINDOW_SECS)
                .query_async(&mut state.redis.clone())
                .await
                .unwrap_or(());
        }
    } else if response.status().is_success() {
        let _: () = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut state.redis.clone())
            .await
            .unwrap_or(());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_read_from_json_body() {
        assert_eq!(
            extract_username_from_body(br#"{"username":"22951A0501","password":"x"}"#),
            Some("22951A0501".to_string())
        );
        assert_eq!(extract_username_from_body(br#"{"password":"x"}"#), None);
        assert_eq!(extract_username_from_body(b"not json"), None);
    }

    #[test]
    fn keys_are_per_username() {
        assert_eq!(attempt_key("A1"), "rate_limit:attendance:A1");
        assert_ne!(attempt_key("A1"), attempt_key("A2"));
    }
}
