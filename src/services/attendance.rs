use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;

use crate::{
    error::{AppError, Result},
    models::{attendance::FetchResult, credentials::Credentials},
    repositories::attendance::AttendanceStore,
    services::{
        fetch::{AttendanceFetcher, FetchError},
        scheduler::{JobQueue, JobTicket, SchedulerError},
    },
};

type RefreshTicket = JobTicket<std::result::Result<FetchResult, FetchError>>;

/// How long a cached result stays fresh and how long callers wait on the queue.
#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

/// A result handed back to a caller, and whether it came from the store.
#[derive(Debug, Clone)]
pub struct AttendanceLookup {
    pub result: FetchResult,
    pub cached: bool,
}

/// Outcome of a server-side batch refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub elapsed_seconds: u64,
}

/// Cache-aware entry point to the fetch pipeline.
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    fetcher: Arc<AttendanceFetcher>,
    queue: JobQueue,
    policy: AttendancePolicy,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        fetcher: Arc<AttendanceFetcher>,
        queue: JobQueue,
        policy: AttendancePolicy,
    ) -> Self {
        Self {
            store,
            fetcher,
            queue,
            policy,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Returns a fresh stored result, or queues a live fetch and waits for it.
    ///
    /// If the wait times out the job keeps running and still updates the store.
    pub async fn get_attendance(&self, credentials: Credentials) -> Result<AttendanceLookup> {
        let identifier = credentials.identifier().to_string();

        if let Some(stored) = self.store.get(&identifier).await? {
            if stored.is_fresh(&credentials, self.policy.cache_ttl, Utc::now()) {
                tracing::info!(identifier = %identifier, "Serving fresh stored attendance");
                return Ok(AttendanceLookup {
                    result: stored.result,
                    cached: true,
                });
            }
        }

        let ticket = self.enqueue_refresh(credentials)?;
        tracing::debug!(identifier = %identifier, job = %ticket.id(), "Queued live fetch");

        let outcome = timeout(self.policy.request_timeout, ticket.wait())
            .await
            .map_err(|_| {
                AppError::Timeout(
                    "Fetch is taking longer than expected; try again shortly".to_string(),
                )
            })??;

        let result = outcome?;
        Ok(AttendanceLookup {
            result,
            cached: false,
        })
    }

    /// Re-fetches stored users one job at a time, using the credentials on record.
    ///
    /// `None` refreshes every stored user. Users without a usable secret and
    /// failed fetches count as skipped.
    pub async fn refresh_batch(&self, identifiers: Option<&[String]>) -> Result<BatchReport> {
        let started = Instant::now();
        let users = self.store.list_credentials(identifiers).await?;
        tracing::info!(users = users.len(), "Starting batch refresh");

        let mut report = BatchReport::default();
        for user in users {
            report.processed += 1;

            let Some(credentials) = user.credentials() else {
                tracing::warn!(identifier = %user.identifier, "Skipping user without stored secret");
                report.skipped += 1;
                continue;
            };

            // Submitted one by one so interactive requests can interleave.
            let ticket = match self.enqueue_refresh(credentials) {
                Ok(ticket) => ticket,
                Err(e) => {
                    tracing::warn!(identifier = %user.identifier, error = %e, "Batch job not queued");
                    report.skipped += 1;
                    continue;
                }
            };
            match ticket.wait().await {
                Ok(Ok(_)) => report.succeeded += 1,
                Ok(Err(e)) => {
                    tracing::warn!(identifier = %user.identifier, error = %e, "Batch fetch failed");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(identifier = %user.identifier, error = %e, "Batch job aborted");
                    report.skipped += 1;
                }
            }
        }

        report.elapsed_seconds = started.elapsed().as_secs();
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            skipped = report.skipped,
            elapsed_seconds = report.elapsed_seconds,
            "Batch refresh finished"
        );
        Ok(report)
    }

    /// Queues fetch-then-store for one user. Only a complete result is stored.
    fn enqueue_refresh(
        &self,
        credentials: Credentials,
    ) -> std::result::Result<RefreshTicket, SchedulerError> {
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();

        self.queue.submit(async move {
            let result = fetcher.fetch_for_user(&credentials).await?;
            if let Err(e) = store.put(&credentials, &result).await {
                tracing::error!(
                    identifier = credentials.identifier(),
                    "Failed to store fetch result: {}",
                    e
                );
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::PortalError;
    use crate::repositories::attendance::{tests::sample_result, MemoryAttendanceStore};
    use crate::services::fetch::tests::{days, fetcher, row, MockPortal};
    use std::sync::atomic::Ordering;

    fn service(portal: Arc<MockPortal>, store: Arc<MemoryAttendanceStore>) -> AttendanceService {
        AttendanceService::new(
            store,
            Arc::new(fetcher(portal)),
            JobQueue::start(Duration::from_millis(1), 16),
            AttendancePolicy {
                cache_ttl: Duration::from_secs(600),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn live_fetch_is_stored_then_served_from_cache() {
        let portal = Arc::new(MockPortal::healthy());
        let store = Arc::new(MemoryAttendanceStore::default());
        let service = service(portal.clone(), store.clone());
        let creds = Credentials::new("22951A0501", "pw");

        let first = service.get_attendance(creds.clone()).await.unwrap();
        assert!(!first.cached);
        assert!(store.get("22951A0501").await.unwrap().is_some());

        let second = service.get_attendance(creds).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.result, first.result);
        assert_eq!(portal.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_secret_bypasses_cache() {
        let portal = Arc::new(MockPortal::healthy());
        portal.push_academic(Ok(vec![row("ACSD09", 10, 10)]));
        portal.push_biometric(Ok(days(&[true])));
        let store = Arc::new(MemoryAttendanceStore::default());
        let service = service(portal.clone(), store);

        service
            .get_attendance(Credentials::new("22951A0501", "old"))
            .await
            .unwrap();
        let lookup = service
            .get_attendance(Credentials::new("22951A0501", "new"))
            .await
            .unwrap();

        assert!(!lookup.cached);
        assert_eq!(lookup.result.academic[0].course_code, "ACSD09");
        assert_eq!(portal.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_result() {
        let portal = Arc::new(MockPortal::default());
        portal.push_academic(Ok(Vec::new()));
        portal.push_biometric(Ok(days(&[true])));
        let store = Arc::new(MemoryAttendanceStore::default());
        let stale = sample_result("22951A0501", Utc::now() - chrono::Duration::hours(5));
        store
            .put(&Credentials::new("22951A0501", "pw"), &stale)
            .await
            .unwrap();
        let service = service(portal, store.clone());

        let err = service
            .get_attendance(Credentials::new("22951A0501", "pw"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "EmptyResult");
        assert_eq!(store.get("22951A0501").await.unwrap().unwrap().result, stale);
    }

    #[tokio::test]
    async fn rejected_credentials_surface_to_caller() {
        let portal = Arc::new(MockPortal {
            reject_login: true,
            ..MockPortal::default()
        });
        let store = Arc::new(MemoryAttendanceStore::default());
        let service = service(portal, store.clone());

        let err = service
            .get_attendance(Credentials::new("22951A0501", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidCredentials");
        assert!(store.get("22951A0501").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn timed_out_wait_still_stores_result() {
        let portal = Arc::new(MockPortal {
            page_delay: Some(Duration::from_millis(300)),
            ..MockPortal::healthy()
        });
        let store = Arc::new(MemoryAttendanceStore::default());
        let service = AttendanceService::new(
            store.clone(),
            Arc::new(fetcher(portal)),
            JobQueue::start(Duration::from_millis(1), 16),
            AttendancePolicy {
                cache_ttl: Duration::from_secs(600),
                request_timeout: Duration::from_millis(60),
            },
        );

        let err = service
            .get_attendance(Credentials::new("22951A0501", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Timeout");

        // Barrier job: runs only after the abandoned fetch has finished.
        service.queue().submit(async {}).unwrap().wait().await.unwrap();
        assert!(store.get("22951A0501").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn full_queue_answers_upstream_unavailable() {
        let portal = Arc::new(MockPortal::healthy());
        let service = AttendanceService::new(
            Arc::new(MemoryAttendanceStore::default()),
            Arc::new(fetcher(portal.clone())),
            JobQueue::start(Duration::from_millis(1), 1),
            AttendancePolicy {
                cache_ttl: Duration::from_secs(600),
                request_timeout: Duration::from_secs(5),
            },
        );

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let running = service
            .queue()
            .submit(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
            .unwrap();
        started_rx.await.unwrap();
        let waiting = service.queue().submit(async {}).unwrap();

        let err = service
            .get_attendance(Credentials::new("22951A0501", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnavailable");
        assert_eq!(portal.logins.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        running.wait().await.unwrap();
        waiting.wait().await.unwrap();
    }

    #[tokio::test]
    async fn batch_counts_successes_and_skips() {
        let portal = Arc::new(MockPortal::default());
        // "A1" succeeds; "A3" is rejected on the portal side.
        portal.push_academic(Ok(vec![row("ACSD01", 10, 9)]));
        portal.push_biometric(Ok(days(&[true])));
        portal.push_academic(Err(PortalError::ParseFailure("garbled".to_string())));
        portal.push_biometric(Ok(days(&[true])));

        let store = Arc::new(MemoryAttendanceStore::default());
        store.insert_credentials("A1", Some("pw1")).await;
        store.insert_credentials("A2", None).await;
        store.insert_credentials("A3", Some("pw3")).await;
        let service = service(portal, store.clone());

        let report = service.refresh_batch(None).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 2);
        assert!(store.get("A1").await.unwrap().is_some());
        assert!(store.get("A3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_only_touches_named_users() {
        let portal = Arc::new(MockPortal::healthy());
        let store = Arc::new(MemoryAttendanceStore::default());
        store.insert_credentials("A1", Some("pw1")).await;
        store.insert_credentials("A2", Some("pw2")).await;
        let service = service(portal.clone(), store);

        let report = service
            .refresh_batch(Some(&["A2".to_string(), "missing".to_string()]))
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(portal.logins.load(Ordering::SeqCst), 1);
    }
}
