//! Scheduler trait: submit a job, cancel a job.

use async_trait::async_trait;
use geojob_types::{CancelOutcome, Job, JobError, JobId, JobKind, OwnerId};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("scheduler error: {0}")]
    Other(String),
}

/// Front door for callers that create or stop work.
///
/// Status is not read through the scheduler: the job store is the source of truth and the
/// status publisher streams its changes.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Validate `input` for `kind`, create a Pending job and queue it.
    async fn submit(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        owner: &OwnerId,
    ) -> Result<Job, SchedulerError>;

    /// Request cancellation. Terminal jobs yield `AlreadyTerminal`, not an error.
    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, SchedulerError>;
}
