//! Store and change-feed seams.

use crate::{Job, JobError, JobId, JobKind, JobQuery, JobStats, JobStatus, OwnerId, Transition};
use async_trait::async_trait;

/// Durable, queryable record of all jobs; the single source of truth for status.
///
/// Every mutating call is atomic per job id: two concurrent transitions from the same prior
/// status cannot both succeed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a Pending job. Fails with `InvalidInput` when the input is not a JSON object.
    async fn create(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        owner: &OwnerId,
    ) -> Result<Job, JobError>;

    async fn get(&self, id: JobId) -> Result<Job, JobError>;

    /// Snapshot of matching jobs, newest first.
    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, JobError>;

    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, JobError> {
        self.list(&JobQuery::for_owner(owner.clone()).with_status(status))
            .await
    }

    /// `Conflict` when the job is not Processing or the progress would decrease.
    async fn update_progress(
        &self,
        id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<Job, JobError>;

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, JobError>;

    async fn stats(&self, owner: Option<&OwnerId>) -> Result<JobStats, JobError> {
        let query = JobQuery {
            owner: owner.cloned(),
            ..JobQuery::default()
        };
        let jobs = self.list(&query).await?;
        Ok(jobs.iter().collect())
    }
}

/// Receives every snapshot a store commits, in commit order per job.
///
/// Called while the store still serialises writes to that job, so implementations must not
/// block or call back into the store.
pub trait JobChangeSink: Send + Sync {
    fn publish(&self, job: &Job);
}
