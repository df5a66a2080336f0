//! Single-flight FIFO job queue.
//!
//! One worker task runs queued jobs strictly one at a time, in submission
//! order, and sleeps for the politeness delay after every job whatever its
//! outcome. Each job's output goes back only to its own submitter.
//!
//! The queue is bounded; a full queue refuses new jobs. A job whose
//! submitter stopped waiting before it started is skipped.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The job panicked or the queue shut down before it produced a result.
    #[error("job {0} ended without a result")]
    Aborted(Uuid),

    #[error("job queue is full ({0} waiting)")]
    QueueFull(usize),
}

struct QueuedJob {
    id: Uuid,
    /// Resolves to `false` when the job was skipped.
    task: BoxFuture<'static, bool>,
}

/// Handle to a submitted job's result.
///
/// Dropping the ticket stops waiting. A job that already started still runs
/// to completion; one still waiting in the queue is skipped.
pub struct JobTicket<T> {
    id: Uuid,
    rx: oneshot::Receiver<T>,
}

impl<T> JobTicket<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the job to finish.
    pub async fn wait(self) -> Result<T, SchedulerError> {
        self.rx.await.map_err(|_| SchedulerError::Aborted(self.id))
    }
}

/// Cloneable handle to the queue's worker.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// `capacity` bounds the jobs waiting behind the one running.
    pub fn start(politeness_delay: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(rx, politeness_delay, pending.clone()));
        tracing::info!(
            delay_ms = politeness_delay.as_millis() as u64,
            capacity,
            "✅ Job queue started"
        );
        Self { tx, pending }
    }

    /// Enqueues a job and returns a ticket for its result.
    pub fn submit<F, T>(&self, job: F) -> Result<JobTicket<T>, SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = Uuid::new_v4();
        let (result_tx, rx) = oneshot::channel();
        let task = Box::pin(async move {
            if result_tx.is_closed() {
                return false;
            }
            let output = job.await;
            if result_tx.send(output).is_err() {
                tracing::debug!(job = %id, "Submitter stopped waiting; result dropped");
            }
            true
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(QueuedJob { id, task }) {
            Ok(()) => {
                tracing::debug!(job = %id, queued = self.queued(), "Job submitted");
                Ok(JobTicket { id, rx })
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let waiting = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
                tracing::warn!(job = %id, waiting, "Job queue full, refusing job");
                Err(SchedulerError::QueueFull(waiting))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(job = %id, "Job queue worker is gone");
                Err(SchedulerError::Aborted(id))
            }
        }
    }

    /// Jobs submitted but not yet finished, including the one running.
    pub fn queued(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<QueuedJob>,
    politeness_delay: Duration,
    pending: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        tracing::debug!(job = %job.id, "Job started");

        // A separate task so a panicking job cannot take the worker down.
        let outcome = tokio::spawn(job.task).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Ok(true) => tracing::debug!(job = %job.id, "Job finished"),
            Ok(false) => {
                // Nothing was sent to the portal, so no delay is owed.
                tracing::debug!(job = %job.id, "Job abandoned before it started, skipped");
                continue;
            }
            Err(e) if e.is_panic() => tracing::error!(job = %job.id, "Job panicked"),
            Err(e) => tracing::error!(job = %job.id, "Job failed to run: {}", e),
        }

        tokio::time::sleep(politeness_delay).await;
    }
    tracing::info!("Job queue closed");
}
