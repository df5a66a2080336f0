//! The academic portal seam: session acquisition and record extraction.
//!
//! The orchestrator only sees the two traits below, so the scraping mechanism
//! (plain HTTP + HTML parsing today) can be swapped without touching it.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::session::PortalSession;

pub mod client;
pub mod parse;

pub use parse::{AcademicRow, BiometricDay};

/// Errors raised by the portal adapters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortalError {
    /// Identifier or secret was empty. Raised before any network call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The portal explicitly rejected the credentials.
    #[error("credentials rejected by the portal")]
    InvalidCredentials,

    /// Connection, DNS or HTTP-level failure talking to the portal.
    #[error("portal unreachable: {0}")]
    Unreachable(String),

    #[error("portal call timed out")]
    Timeout,

    /// The portal bounced to its login form or served no attendance table.
    #[error("portal session expired")]
    SessionExpired,

    /// The document had the dataset's table but no row could be parsed.
    #[error("could not parse portal document: {0}")]
    ParseFailure(String),
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout
        } else {
            PortalError::Unreachable(err.to_string())
        }
    }
}

/// Which document to pull from the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Academic,
    Biometric,
}

impl Dataset {
    /// The portal `action` query value for this dataset.
    pub fn action(self) -> &'static str {
        match self {
            Dataset::Academic => "stud_att_STD",
            Dataset::Biometric => "std_bio",
        }
    }
}

/// Parsed rows of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Academic(Vec<AcademicRow>),
    Biometric(Vec<BiometricDay>),
}

/// Produces an authenticated portal session from credentials.
#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    /// Logs in. Must fail with `InvalidInput` without I/O when either value is empty.
    async fn acquire(&self, identifier: &str, secret: &str) -> Result<PortalSession, PortalError>;
}

/// Fetches and parses one dataset using an existing session.
///
/// Implementations must be safe to call concurrently with the same session.
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract(
        &self,
        session: &PortalSession,
        dataset: Dataset,
    ) -> Result<Extracted, PortalError>;
}
