//! Pull publisher: re-reads the store on an interval.

use crate::{snapshot, JobEventStream, StatusPublisher};
use chrono::{DateTime, Utc};
use geojob_types::{Job, JobChangeEvent, JobId, JobStore, SubscriptionFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Emits a snapshot whenever a job's state key has advanced since the previous poll.
/// Intermediate states between two polls are not observed.
pub struct PollingPublisher {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl PollingPublisher {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

impl StatusPublisher for PollingPublisher {
    fn subscribe(&self, filter: SubscriptionFilter) -> JobEventStream {
        let store = Arc::clone(&self.store);
        let interval = self.interval;
        Box::pin(async_stream::stream! {
            let mut seen: HashMap<JobId, (u8, u8, u64)> = HashMap::new();
            // Start of the previous poll. A job that was already terminal by then has been
            // emitted and needs no entry in `seen`.
            let mut settled_before: Option<DateTime<Utc>> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let polled_at = Utc::now();
                let jobs = match snapshot(store.as_ref(), &filter).await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        tracing::warn!(error = %e, "status poll failed");
                        continue;
                    }
                };
                let mut present = HashSet::with_capacity(jobs.len());
                for job in jobs {
                    if finished_before(&job, settled_before) {
                        continue;
                    }
                    present.insert(job.id);
                    let key = job.state_key();
                    if seen.get(&job.id).map_or(true, |prev| key > *prev) {
                        seen.insert(job.id, key);
                        yield JobChangeEvent::now(job);
                    }
                }
                // Terminal jobs drop out above once settled; jobs leaving the filter never return.
                seen.retain(|id, _| present.contains(id));
                settled_before = Some(polled_at);
            }
        })
    }
}

fn finished_before(job: &Job, cutoff: Option<DateTime<Utc>>) -> bool {
    match (job.is_terminal(), job.completed_at, cutoff) {
        (true, Some(done), Some(cutoff)) => done < cutoff,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojob_store::InMemoryJobStore;
    use geojob_types::{JobKind, JobStatus, OwnerId, Transition};
    use serde_json::json;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn emits_only_advancing_snapshots() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let publisher = PollingPublisher::new(Arc::clone(&store), Duration::from_millis(10));
        let job = store
            .create(JobKind::Classification, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        let mut stream = publisher.subscribe(SubscriptionFilter::for_job(job.id));

        let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.job.status, JobStatus::Pending);

        // No change, no event.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );

        store.transition(job.id, Transition::start()).await.unwrap();
        store.update_progress(job.id, 70, None).await.unwrap();
        store
            .transition(job.id, Transition::complete(json!({})))
            .await
            .unwrap();

        let mut last = first.job.state_key();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .unwrap()
                .unwrap();
            assert!(event.job.state_key() > last);
            last = event.job.state_key();
            if event.job.status == JobStatus::Completed {
                break;
            }
        }
    }

    #[tokio::test]
    async fn settled_jobs_are_forgotten_without_repeating() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let publisher = PollingPublisher::new(Arc::clone(&store), Duration::from_millis(10));
        let owner = OwnerId::from("u1");
        let job = store
            .create(JobKind::Classification, json!({}), &owner)
            .await
            .unwrap();
        store.transition(job.id, Transition::cancel()).await.unwrap();
        let mut stream = publisher.subscribe(SubscriptionFilter::for_owner(owner.clone()));

        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job.status, JobStatus::Cancelled);

        // Several polls later the settled job is still not repeated.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), stream.next())
                .await
                .is_err()
        );

        let fresh = store
            .create(JobKind::Classification, json!({}), &owner)
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job.id, fresh.id);
    }

    #[test]
    fn only_jobs_settled_before_the_cutoff_are_skipped() {
        let mut job = Job::new(JobKind::Classification, json!({}), OwnerId::from("u1"));
        let cutoff = chrono::Utc::now();
        assert!(!finished_before(&job, Some(cutoff)));

        job.status = JobStatus::Completed;
        job.completed_at = Some(cutoff - chrono::Duration::seconds(1));
        assert!(finished_before(&job, Some(cutoff)));
        assert!(!finished_before(&job, None));

        job.completed_at = Some(cutoff + chrono::Duration::seconds(1));
        assert!(!finished_before(&job, Some(cutoff)));
    }

    #[tokio::test]
    async fn owner_filter_hides_foreign_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        store
            .create(JobKind::Classification, json!({}), &OwnerId::from("u2"))
            .await
            .unwrap();
        let mine = store
            .create(JobKind::Classification, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        let publisher = PollingPublisher::new(Arc::clone(&store), Duration::from_millis(10));
        let mut stream = publisher.subscribe(SubscriptionFilter::for_owner(OwnerId::from("u1")));
        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job.id, mine.id);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
    }
}
