use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::portal::PortalError;
use crate::services::fetch::FetchError;
use crate::services::scheduler::SchedulerError;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored column was missing or had the wrong type.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A validation error. No I/O has happened yet.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The portal rejected the presented credentials.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The portal could not be reached or kept answering with unusable documents.
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// A portal call or the wait on a queued job timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The portal answered but returned no attendance data.
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// An operator route was called without a valid admin token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The error kind reported to callers in the `error` field of the envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "InvalidInput",
            AppError::InvalidCredentials(_) => "InvalidCredentials",
            AppError::Upstream(_) => "UpstreamUnavailable",
            AppError::Timeout(_) => "Timeout",
            AppError::EmptyResult(_) => "EmptyResult",
            AppError::RateLimitExceeded(_) => "RateLimited",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Redis(_)
            | AppError::MissingData(_)
            | AppError::Serialization(_)
            | AppError::Encryption(_)
            | AppError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) | AppError::EmptyResult(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        let message = err.to_string();
        match err {
            FetchError::EmptyResult => AppError::EmptyResult(message),
            FetchError::Stage { source, .. } => match source {
                PortalError::InvalidInput(_) => AppError::Validation(message),
                PortalError::InvalidCredentials => AppError::InvalidCredentials(message),
                PortalError::Timeout => AppError::Timeout(message),
                PortalError::Unreachable(_) | PortalError::SessionExpired => {
                    AppError::Upstream(message)
                }
                PortalError::ParseFailure(_) => AppError::Internal(message),
            },
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::QueueFull(_) => AppError::Upstream(
                "Too many fetches are waiting for the portal; try again shortly".to_string(),
            ),
            SchedulerError::Aborted(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                "Database error".to_string()
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                "Cache error".to_string()
            }

            AppError::MissingData(ref msg) | AppError::Serialization(ref msg) => {
                tracing::error!("Stored data error: {}", msg);
                "Stored data error".to_string()
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                "Encryption error".to_string()
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                msg.clone()
            }

            AppError::InvalidCredentials(ref msg) => {
                tracing::warn!("Invalid credentials: {}", msg);
                "Invalid credentials".to_string()
            }

            AppError::Upstream(ref msg) => {
                tracing::warn!("Upstream unavailable: {}", msg);
                msg.clone()
            }

            AppError::Timeout(ref msg) => {
                tracing::warn!("Timeout: {}", msg);
                msg.clone()
            }

            AppError::EmptyResult(ref msg) => {
                tracing::warn!("Empty result: {}", msg);
                "No attendance data found; nothing was saved".to_string()
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                msg.clone()
            }

            AppError::Unauthorized(ref msg) => {
                tracing::warn!("Unauthorized: {}", msg);
                "Admin token required".to_string()
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": self.kind(),
            "message": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal","message":"Internal server error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
