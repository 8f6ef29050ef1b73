//! Supervisory sweep failing jobs stuck in Processing.

use chrono::Utc;
use geojob_types::{JobError, JobQuery, JobStatus, JobStore, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT_MESSAGE: &str = "timeout";

/// Fails jobs that have been Processing for longer than `job_timeout`, independent of the
/// runner's own retries.
pub struct TimeoutSweeper {
    store: Arc<dyn JobStore>,
    job_timeout: Duration,
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(store: Arc<dyn JobStore>, job_timeout: Duration, interval: Duration) -> Self {
        Self {
            store,
            job_timeout,
            interval,
        }
    }

    /// One pass over the store. Returns the number of jobs failed.
    pub async fn sweep_once(&self) -> Result<usize, JobError> {
        let now = Utc::now();
        let processing = self
            .store
            .list(&JobQuery::all().with_status(Some(JobStatus::Processing)))
            .await?;
        let mut swept = 0;
        for job in processing {
            let Some(started) = job.started_at else {
                continue;
            };
            let elapsed = (now - started).to_std().unwrap_or_default();
            if elapsed <= self.job_timeout {
                continue;
            }
            match self
                .store
                .transition(job.id, Transition::fail(TIMEOUT_MESSAGE))
                .await
            {
                Ok(_) => {
                    tracing::warn!(
                        job_id = %job.id,
                        kind = %job.kind,
                        elapsed_secs = elapsed.as_secs(),
                        "job exceeded processing ceiling"
                    );
                    swept += 1;
                }
                // Finished between the listing and the update.
                Err(JobError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(swept)
    }

    /// Run `sweep_once` every `interval` until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once().await {
                    tracing::warn!(error = %e, "timeout sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojob_store::InMemoryJobStore;
    use geojob_types::{JobKind, OwnerId};
    use serde_json::json;

    #[tokio::test]
    async fn stuck_job_is_failed_with_timeout() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let owner = OwnerId::from("u1");
        let stuck = store
            .create(JobKind::NdviCalculation, json!({}), &owner)
            .await
            .unwrap();
        store.transition(stuck.id, Transition::start()).await.unwrap();
        store.update_progress(stuck.id, 40, None).await.unwrap();
        let waiting = store
            .create(JobKind::NdviCalculation, json!({}), &owner)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let sweeper = TimeoutSweeper::new(
            Arc::clone(&store),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let failed = store.get(stuck.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(failed.progress, 40);
        assert_eq!(
            store.get(waiting.id).await.unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_jobs_are_left_alone() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobKind::BufferAnalysis, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        store.transition(job.id, Transition::start()).await.unwrap();
        let sweeper = TimeoutSweeper::new(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_sweep_runs_until_shutdown() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobKind::BufferAnalysis, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        store.transition(job.id, Transition::start()).await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = TimeoutSweeper::new(
            Arc::clone(&store),
            Duration::from_millis(5),
            Duration::from_millis(10),
        )
        .spawn(shutdown.clone());

        let mut status = JobStatus::Processing;
        for _ in 0..100 {
            status = store.get(job.id).await.unwrap().status;
            if status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Failed);
        shutdown.cancel();
        handle.await.unwrap();
    }
}
