//! Status publisher: streams of job change events for interested subscribers.
//!
//! Two implementations sit behind [`StatusPublisher`]: [`BroadcastPublisher`] is fed by the
//! store's change sink and pushes every committed snapshot, [`PollingPublisher`] re-reads the
//! store on an interval. Both deliver at least once; consumers drop snapshots that do not
//! advance a job's [`state_key`](geojob_types::Job::state_key).

mod broadcast;
mod polling;

pub use broadcast::BroadcastPublisher;
pub use polling::PollingPublisher;

use geojob_types::{Job, JobChangeEvent, JobError, JobStore, SubscriptionFilter};
use std::pin::Pin;
use tokio_stream::Stream;

pub type JobEventStream = Pin<Box<dyn Stream<Item = JobChangeEvent> + Send>>;

pub trait StatusPublisher: Send + Sync {
    /// Long-lived stream of changes matching `filter`; ends when dropped.
    fn subscribe(&self, filter: SubscriptionFilter) -> JobEventStream;
}

/// Current state of every job `filter` can see, oldest first.
pub(crate) async fn snapshot(
    store: &dyn JobStore,
    filter: &SubscriptionFilter,
) -> Result<Vec<Job>, JobError> {
    if let Some(id) = filter.job_id {
        return match store.get(id).await {
            Ok(job) if filter.matches(&job) => Ok(vec![job]),
            Ok(_) | Err(JobError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
    }
    let mut jobs = store.list(&filter.as_query()).await?;
    jobs.retain(|job| filter.matches(job));
    jobs.reverse();
    Ok(jobs)
}
