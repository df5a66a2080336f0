use redis::aio::ConnectionManager;
use std::sync::Arc;
use zeroize::Zeroizing;
use crate::config::Config;
use crate::crypto::aes::{SecretCipher, SecureKey};
use crate::error::{AppError, Result};
use crate::portal::client::{PortalClient, PortalLimiter};
use crate::repositories::attendance::{ensure_schema, PgAttendanceStore};
use crate::services::attendance::{AttendancePolicy, AttendanceService};
use crate::services::fetch::{AttendanceFetcher, FetchTimeouts};
use crate::services::scheduler::JobQueue;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The Redis connection manager.
    pub redis: ConnectionManager,
    /// Cache-aware fetch pipeline behind the job queue.
    pub attendance: Arc<AttendanceService>,
    /// Outbound connection cap for the portal.
    pub portal_limiter: PortalLimiter,
    /// Token the batch routes require.
    pub admin_token: Option<Arc<Zeroizing<String>>>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// Connects to PostgreSQL and Redis, creates the schema if needed and
    /// starts the job queue worker.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        ensure_schema(&db).await?;
        tracing::info!("✅ PostgreSQL Pool initialized and schema ready");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let cipher = SecretCipher::new(SecureKey::from_slice(config.master_key.as_slice())?);
        let store = Arc::new(PgAttendanceStore::new(db.clone(), cipher));

        let portal_limiter = PortalLimiter::new(config.portal_max_connections);
        let client = Arc::new(PortalClient::new(
            &config.portal_base_url,
            config.portal_login_timeout.max(config.portal_page_timeout),
            portal_limiter.clone(),
        )
        .map_err(|e| AppError::Internal(e.to_string()))?);
        tracing::info!(
            base_url = %config.portal_base_url,
            max_connections = config.portal_max_connections,
            "✅ Portal client initialized"
        );

        let fetcher = Arc::new(AttendanceFetcher::new(
            client.clone(),
            client,
            FetchTimeouts {
                login: config.portal_login_timeout,
                page: config.portal_page_timeout,
            },
        ));

        let queue = JobQueue::start(config.politeness_delay, config.queue_capacity);

        let attendance = Arc::new(AttendanceService::new(
            store,
            fetcher,
            queue,
            AttendancePolicy {
                cache_ttl: config.cache_ttl,
                request_timeout: config.request_timeout,
            },
        ));

        Ok(AppState {
            redis,
            attendance,
            portal_limiter,
            admin_token: config.admin_token.clone().map(Arc::new),
        })
    }
}
