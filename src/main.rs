use axum::{
    Router,
    routing::{get, post},
    middleware::from_fn_with_state,
    extract::DefaultBodyLimit,
};

use std::net::SocketAddr;
use tower_http::trace::{TraceLayer, DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, DefaultOnFailure};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod state;
mod db;
mod portal;
mod crypto {
    pub mod aes;
}

mod models {
    pub mod attendance;
    pub mod credentials;
    pub mod session;
}

mod repositories {
    pub mod attendance;
    pub mod visits;
}

mod services {
    pub mod attendance;
    pub mod fetch;
    pub mod metrics;
    pub mod scheduler;
}

mod handlers {
    pub mod attendance;
    pub mod health;
}

mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
}

mod validation {
    pub mod credentials;
}

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");
    if state.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; batch routes will refuse every request");
    }

    let attendance_routes = Router::new()
        .route("/api/attendance", post(handlers::attendance::get_attendance))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_attendance,
        ))
        .with_state(state.clone());

    let batch_routes = Router::new()
        .route("/api/attendance/batch", post(handlers::attendance::run_batch))
        .route(
            "/api/attendance/refresh-all",
            post(handlers::attendance::refresh_all),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_admin_token,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/api/visits/today", get(handlers::health::today_visits))
        .route("/health", get(handlers::health::health))
        .with_state(state.clone());

    let app = Router::new()
        .merge(attendance_routes)
        .merge(batch_routes)
        .merge(public_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(256 * 1024));

    if let Some(interval) = config.batch_refresh_interval {
        let batch_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::info!("🔄 Running scheduled batch refresh...");
                match batch_state.attendance.refresh_batch(None).await {
                    Ok(report) => {
                        tracing::info!(
                            processed = report.processed,
                            succeeded = report.succeeded,
                            "✅ Scheduled batch refresh completed"
                        );
                    }
                    Err(e) => {
                        tracing::error!("❌ Scheduled batch refresh failed: {}", e);
                    }
                }
            }
        });
        tracing::info!(
            "✅ Background batch refresh started (every {}s)",
            interval.as_secs()
        );
    }

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
