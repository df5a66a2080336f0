use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;

use crate::models::attendance::{AcademicRecord, BiometricSummary, FetchResult};
use crate::models::credentials::Credentials;
use crate::models::session::PortalSession;
use crate::portal::{
    AcademicRow, BiometricDay, Dataset, Extracted, PortalError, RecordExtractor, SessionAcquirer,
};
use crate::services::metrics::{self, AttendanceTarget};

/// Where a fetch is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Idle,
    Authenticating,
    FetchingAcademic,
    FetchingBiometric,
    Computing,
    Done,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchStage::Idle => "idle",
            FetchStage::Authenticating => "authenticating",
            FetchStage::FetchingAcademic => "fetching academic attendance",
            FetchStage::FetchingBiometric => "fetching biometric attendance",
            FetchStage::Computing => "computing metrics",
            FetchStage::Done => "done",
        })
    }
}

/// A failed fetch, tagged with the stage that failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: FetchStage,
        source: PortalError,
    },

    /// The portal answered but there was nothing worth keeping.
    #[error("portal returned no academic attendance rows")]
    EmptyResult,
}

impl FetchError {
    fn at(stage: FetchStage) -> impl FnOnce(PortalError) -> FetchError {
        move |source| FetchError::Stage { stage, source }
    }

    fn is_session_expired(&self) -> bool {
        matches!(
            self,
            FetchError::Stage {
                source: PortalError::SessionExpired,
                ..
            }
        )
    }
}

/// Per-call timeouts for portal I/O.
#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    pub login: Duration,
    pub page: Duration,
}

/// Runs login, both dataset fetches and the metric computation for one user.
pub struct AttendanceFetcher {
    acquirer: Arc<dyn SessionAcquirer>,
    extractor: Arc<dyn RecordExtractor>,
    timeouts: FetchTimeouts,
    target: AttendanceTarget,
}

impl AttendanceFetcher {
    pub fn new(
        acquirer: Arc<dyn SessionAcquirer>,
        extractor: Arc<dyn RecordExtractor>,
        timeouts: FetchTimeouts,
    ) -> Self {
        Self {
            acquirer,
            extractor,
            timeouts,
            target: AttendanceTarget::default(),
        }
    }

    /// Fetches a complete result for one user.
    ///
    /// A `SessionExpired` from either dataset triggers exactly one fresh login
    /// and a second attempt; every other error ends the fetch. Partial data is
    /// never returned.
    pub async fn fetch_for_user(&self, credentials: &Credentials) -> Result<FetchResult, FetchError> {
        let identifier = credentials.identifier();
        tracing::debug!(identifier, stage = %FetchStage::Idle, "Starting fetch");

        let session = self.authenticate(credentials).await?;
        let (academic, days) = match self.fetch_datasets(&session).await {
            Err(err) if err.is_session_expired() => {
                tracing::warn!(
                    identifier,
                    error = %err,
                    session_age_ms = session.acquired_at.elapsed().as_millis() as u64,
                    "Portal session expired, logging in again"
                );
                let session = self.authenticate(credentials).await?;
                self.fetch_datasets(&session).await?
            }
            other => other?,
        };

        tracing::debug!(identifier, stage = %FetchStage::Computing, "Computing metrics");
        let result = self.compute(identifier, academic, &days)?;

        tracing::info!(
            identifier,
            stage = %FetchStage::Done,
            courses = result.academic.len(),
            days = result.biometric.total_days,
            "Fetch completed"
        );
        Ok(result)
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<PortalSession, FetchError> {
        tracing::debug!(
            identifier = credentials.identifier(),
            stage = %FetchStage::Authenticating,
            "Logging in to portal"
        );
        with_timeout(
            FetchStage::Authenticating,
            self.timeouts.login,
            self.acquirer
                .acquire(credentials.identifier(), credentials.secret()),
        )
        .await
    }

    /// Pulls both datasets concurrently; the session is only read.
    async fn fetch_datasets(
        &self,
        session: &PortalSession,
    ) -> Result<(Vec<AcademicRow>, Vec<BiometricDay>), FetchError> {
        let academic = async {
            match self.extract(session, Dataset::Academic, FetchStage::FetchingAcademic).await? {
                Extracted::Academic(rows) => Ok(rows),
                Extracted::Biometric(_) => Err(mismatched(FetchStage::FetchingAcademic)),
            }
        };
        let biometric = async {
            match self.extract(session, Dataset::Biometric, FetchStage::FetchingBiometric).await? {
                Extracted::Biometric(days) => Ok(days),
                Extracted::Academic(_) => Err(mismatched(FetchStage::FetchingBiometric)),
            }
        };
        tokio::try_join!(academic, biometric)
    }

    async fn extract(
        &self,
        session: &PortalSession,
        dataset: Dataset,
        stage: FetchStage,
    ) -> Result<Extracted, FetchError> {
        tracing::debug!(identifier = %session.identifier, %stage, "Fetching dataset");
        with_timeout(stage, self.timeouts.page, self.extractor.extract(session, dataset)).await
    }

    fn compute(
        &self,
        identifier: &str,
        academic: Vec<AcademicRow>,
        days: &[BiometricDay],
    ) -> Result<FetchResult, FetchError> {
        if academic.is_empty() {
            return Err(FetchError::EmptyResult);
        }

        let academic = academic
            .into_iter()
            .map(|row| self.academic_record(row))
            .collect();

        Ok(FetchResult {
            identifier: identifier.to_string(),
            academic,
            biometric: self.biometric_summary(days),
            fetched_at: Utc::now(),
        })
    }

    fn academic_record(&self, row: AcademicRow) -> AcademicRecord {
        let percentage = row
            .percentage
            .unwrap_or_else(|| metrics::percentage(row.attended, row.conducted));
        AcademicRecord {
            classes_needed_for_75: metrics::classes_needed(row.attended, row.conducted, self.target),
            classes_available_to_skip: metrics::classes_skippable(
                row.attended,
                row.conducted,
                self.target,
            ),
            course_code: row.course_code,
            subject_name: row.subject_name,
            course_type: row.course_type,
            course_category: row.course_category,
            total_conducted: row.conducted,
            attended: row.attended,
            percentage,
            status: row.status,
        }
    }

    fn biometric_summary(&self, days: &[BiometricDay]) -> BiometricSummary {
        let total_days = u32::try_from(days.len()).unwrap_or(u32::MAX);
        let present_days = u32::try_from(days.iter().filter(|d| d.present).count()).unwrap_or(u32::MAX);
        BiometricSummary {
            total_days,
            present_days,
            percentage: metrics::percentage(present_days, total_days),
            classes_needed_for_75: metrics::classes_needed(present_days, total_days, self.target),
            classes_available_to_skip: metrics::classes_skippable(
                present_days,
                total_days,
                self.target,
            ),
        }
    }
}

async fn with_timeout<T>(
    stage: FetchStage,
    limit: Duration,
    call: impl Future<Output = Result<T, PortalError>>,
) -> Result<T, FetchError> {
    match timeout(limit, call).await {
        Ok(result) => result.map_err(FetchError::at(stage)),
        Err(_) => Err(FetchError::Stage {
            stage,
            source: PortalError::Timeout,
        }),
    }
}

fn mismatched(stage: FetchStage) -> FetchError {
    FetchError::Stage {
        stage,
        source: PortalError::ParseFailure("extractor returned the wrong dataset".to_string()),
    }
}
