//! Checkpoint that records progress in the store and observes cancellation.

use async_trait::async_trait;
use geojob_ops::{Checkpoint, Interrupt};
use geojob_types::{JobError, JobId, JobStatus, JobStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct StoreCheckpoint {
    store: Arc<dyn JobStore>,
    id: JobId,
    token: CancellationToken,
}

impl StoreCheckpoint {
    pub(crate) fn new(store: Arc<dyn JobStore>, id: JobId, token: CancellationToken) -> Self {
        Self { store, id, token }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[async_trait]
impl Checkpoint for StoreCheckpoint {
    fn job_id(&self) -> JobId {
        self.id
    }

    async fn report(&self, progress: u8, message: &str) -> Result<(), Interrupt> {
        if self.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match self
            .store
            .update_progress(self.id, progress, Some(message.to_string()))
            .await
        {
            Ok(_) => Ok(()),
            Err(JobError::Conflict { .. }) => match self.store.get(self.id).await {
                // A retried attempt re-reporting lower progress; the stored value stands.
                Ok(job) if job.status == JobStatus::Processing => Ok(()),
                Ok(job) => {
                    tracing::info!(job_id = %self.id, status = %job.status, "job left processing");
                    Err(Interrupt::Lost)
                }
                Err(JobError::NotFound(_)) => Err(Interrupt::Lost),
                Err(e) => {
                    tracing::warn!(job_id = %self.id, error = %e, "progress check failed");
                    Ok(())
                }
            },
            Err(JobError::NotFound(_)) => Err(Interrupt::Lost),
            Err(e) => {
                tracing::warn!(job_id = %self.id, progress, error = %e, "progress not recorded");
                Ok(())
            }
        }
    }
}
