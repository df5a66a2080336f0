use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect, Response, Url};
use tokio::sync::{Semaphore, SemaphorePermit};

use super::{parse, Dataset, Extracted, PortalError, RecordExtractor, SessionAcquirer};
use crate::models::session::{PortalSession, SessionTokens};

/// Login form field for the identifier.
const FIELD_USERNAME: &str = "txt_uname";
/// Login form field for the secret. Its presence in a response means the login form came back.
const FIELD_PASSWORD: &str = "txt_pwd";

const USER_AGENT: &str = concat!("attendance-sync/", env!("CARGO_PKG_VERSION"));

/// Caps how many requests are in flight against the portal at once.
#[derive(Clone)]
pub struct PortalLimiter {
    semaphore: Arc<Semaphore>,
}

impl PortalLimiter {
    /// Creates a new `PortalLimiter`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    /// Acquires a permit for one outbound request; released when dropped.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, PortalError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| PortalError::Unreachable("portal limiter closed".to_string()))
    }

    /// Returns the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Talks to the portal over plain HTTP and parses its HTML.
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    limiter: PortalLimiter,
}

impl PortalClient {
    /// Builds a client. Redirects are not followed so that login cookies and
    /// bounces back to the login page stay visible.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        limiter: PortalLimiter,
    ) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PortalError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    fn login_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    fn dataset_url(&self, dataset: Dataset) -> String {
        format!("{}/home?action={}", self.base_url, dataset.action())
    }

    /// Resolves a redirect's `Location` and checks whether it points back at the login page.
    fn redirects_to_login(&self, response: &Response) -> Result<bool, PortalError> {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                PortalError::Unreachable("login redirect without a Location".to_string())
            })?;
        let target = response
            .url()
            .join(location)
            .map_err(|e| PortalError::Unreachable(format!("bad login redirect: {}", e)))?;
        let login = Url::parse(&self.login_url())
            .map_err(|e| PortalError::Unreachable(format!("bad portal base URL: {}", e)))?;

        Ok(target.host_str() == login.host_str()
            && target.path().trim_end_matches('/') == login.path().trim_end_matches('/'))
    }

    async fn fetch_document(
        &self,
        session: &PortalSession,
        dataset: Dataset,
    ) -> Result<String, PortalError> {
        let cookie = session
            .tokens
            .cookie_header()
            .ok_or(PortalError::SessionExpired)?;

        let _permit = self.limiter.acquire().await?;
        let response = self
            .http
            .get(self.dataset_url(dataset))
            .header(header::COOKIE, cookie)
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection() || status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!(?dataset, %status, "Portal bounced the request, session expired");
            return Err(PortalError::SessionExpired);
        }
        if !status.is_success() {
            return Err(PortalError::Unreachable(format!(
                "{} answered {}",
                dataset.action(),
                status
            )));
        }

        let body = response.text().await?;
        if body.contains(FIELD_PASSWORD) {
            tracing::debug!(?dataset, "Portal served the login form, session expired");
            return Err(PortalError::SessionExpired);
        }
        Ok(body)
    }
}

fn collect_cookies(tokens: &mut SessionTokens, response: &Response) {
    for value in response.headers().get_all(header::SET_COOKIE) {
        if let Ok(value) = value.to_str() {
            tokens.apply_set_cookie(value);
        }
    }
}

#[async_trait]
impl SessionAcquirer for PortalClient {
    async fn acquire(&self, identifier: &str, secret: &str) -> Result<PortalSession, PortalError> {
        if identifier.trim().is_empty() || secret.is_empty() {
            return Err(PortalError::InvalidInput(
                "identifier and secret must not be empty".to_string(),
            ));
        }

        let _permit = self.limiter.acquire().await?;
        let mut tokens = SessionTokens::new();

        let landing = self.http.get(self.login_url()).send().await?;
        if !landing.status().is_success() && !landing.status().is_redirection() {
            return Err(PortalError::Unreachable(format!(
                "login page answered {}",
                landing.status()
            )));
        }
        collect_cookies(&mut tokens, &landing);

        let landing_tokens = tokens.clone();

        let mut request = self
            .http
            .post(self.login_url())
            .form(&[(FIELD_USERNAME, identifier), (FIELD_PASSWORD, secret)]);
        if let Some(cookie) = tokens.cookie_header() {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request.send().await?;
        collect_cookies(&mut tokens, &response);

        let status = response.status();
        if status.is_server_error() {
            return Err(PortalError::Unreachable(format!("login answered {}", status)));
        }

        let accepted = if status.is_redirection() {
            // Accepted logins move on; rejected ones bounce back to the form.
            !self.redirects_to_login(&response)?
        } else if status.is_success() {
            // A page without the form only counts if it came with a session.
            let body = response.text().await?;
            !body.contains(FIELD_PASSWORD) && tokens.issued_since(&landing_tokens)
        } else {
            false
        };

        if !accepted || tokens.is_empty() {
            tracing::info!(identifier, %status, "Portal rejected credentials");
            return Err(PortalError::InvalidCredentials);
        }

        tracing::debug!(identifier, tokens = tokens.len(), "Portal session acquired");
        Ok(PortalSession::new(identifier, tokens))
    }
}

#[async_trait]
impl RecordExtractor for PortalClient {
    async fn extract(
        &self,
        session: &PortalSession,
        dataset: Dataset,
    ) -> Result<Extracted, PortalError> {
        let html = self.fetch_document(session, dataset).await?;
        match dataset {
            Dataset::Academic => parse::parse_academic(&html).map(Extracted::Academic),
            Dataset::Biometric => parse::parse_biometric(&html).map(Extracted::Biometric),
        }
    }
}
