use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// Bounds for the per-call portal timeouts, in seconds.
const PORTAL_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 20..=60;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The master key that seals stored portal secrets.
    pub master_key: Zeroizing<Vec<u8>>,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Base URL of the attendance portal.
    pub portal_base_url: String,
    pub portal_login_timeout: Duration,
    pub portal_page_timeout: Duration,
    /// Most requests in flight against the portal at once.
    pub portal_max_connections: usize,
    /// Pause between two queued jobs.
    pub politeness_delay: Duration,
    /// Jobs allowed to wait behind the running one before new ones are refused.
    pub queue_capacity: usize,
    /// How long a stored result counts as fresh.
    pub cache_ttl: Duration,
    /// How long a caller waits on a queued fetch.
    pub request_timeout: Duration,
    /// Period of the background batch refresh; `None` disables it.
    pub batch_refresh_interval: Option<Duration>,
    /// Bearer token for the batch routes; unset leaves them closed.
    pub admin_token: Option<Zeroizing<String>>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut master_key_hex = env::var("MASTER_KEY")
            .context("MASTER_KEY must be set (generate with: openssl rand -hex 32)")?;

        let master_key_bytes =
            hex::decode(&master_key_hex).context("MASTER_KEY must be valid hexadecimal")?;

        master_key_hex.zeroize();

        if master_key_bytes.len() != 32 {
            anyhow::bail!("MASTER_KEY must be exactly 32 bytes (64 hex characters)");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            master_key: Zeroizing::new(master_key_bytes),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            portal_base_url: env::var("PORTAL_BASE_URL")
                .unwrap_or_else(|_| "https://samvidha.iare.ac.in".to_string()),
            portal_login_timeout: portal_timeout("PORTAL_LOGIN_TIMEOUT_SECS", 45)?,
            portal_page_timeout: portal_timeout("PORTAL_PAGE_TIMEOUT_SECS", 30)?,
            portal_max_connections: parse_or("PORTAL_MAX_CONNECTIONS", 2)?,
            politeness_delay: Duration::from_millis(parse_or("POLITENESS_DELAY_MS", 300)?),
            queue_capacity: parse_or("QUEUE_CAPACITY", 64)?,
            cache_ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 1800)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 120)?),
            batch_refresh_interval: match env::var("BATCH_REFRESH_INTERVAL_SECS") {
                Ok(raw) => Some(Duration::from_secs(
                    raw.parse()
                        .context("Invalid BATCH_REFRESH_INTERVAL_SECS")?,
                )),
                Err(_) => None,
            },
            admin_token: env::var("ADMIN_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty())
                .map(Zeroizing::new),
        })
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn portal_timeout(name: &str, default_secs: u64) -> Result<Duration> {
    let secs = parse_or(name, default_secs)?;
    if !PORTAL_TIMEOUT_RANGE.contains(&secs) {
        anyhow::bail!(
            "{} must be between {} and {} seconds",
            name,
            PORTAL_TIMEOUT_RANGE.start(),
            PORTAL_TIMEOUT_RANGE.end()
        );
    }
    Ok(Duration::from_secs(secs))
}
