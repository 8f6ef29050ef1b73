//! In-memory job store: jobs in a map behind one async lock.

use crate::report_rejected;
use async_trait::async_trait;
use chrono::Utc;
use geojob_types::{
    validate_input_shape, Job, JobChangeSink, JobError, JobId, JobKind, JobQuery, JobStore,
    OwnerId, Transition,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct Entry {
    /// Insertion order; breaks ties between jobs created in the same instant.
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    by_id: HashMap<JobId, Entry>,
}

/// In-memory implementation of JobStore (process lifetime only).
///
/// Writes are serialised by the map's write lock, which also makes each read-modify-write on a
/// job atomic. The change sink is invoked before the lock is released.
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<Jobs>>,
    sink: Option<Arc<dyn JobChangeSink>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Jobs::default())),
            sink: None,
        }
    }

    /// Store that hands every committed snapshot to `sink`.
    pub fn with_sink(sink: Arc<dyn JobChangeSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new()
        }
    }

    fn notify(&self, job: &Job) {
        if let Some(ref sink) = self.sink {
            sink.publish(job);
        }
    }

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError> + Send,
    {
        let mut guard = self.jobs.write().await;
        let entry = guard.by_id.get_mut(&id).ok_or(JobError::NotFound(id))?;
        // Work on a copy so a rejected change leaves the stored job untouched.
        let mut next = entry.job.clone();
        f(&mut next)?;
        entry.job = next.clone();
        self.notify(&next);
        Ok(next)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        owner: &OwnerId,
    ) -> Result<Job, JobError> {
        validate_input_shape(&input, owner)?;
        let job = Job::new(kind, input, owner.clone());
        let mut guard = self.jobs.write().await;
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.by_id.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        self.notify(&job);
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobError> {
        let guard = self.jobs.read().await;
        guard
            .by_id
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or(JobError::NotFound(id))
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, JobError> {
        let guard = self.jobs.read().await;
        let mut hits: Vec<&Entry> = guard
            .by_id
            .values()
            .filter(|e| query.matches(&e.job))
            .collect();
        hits.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(hits.into_iter().take(limit).map(|e| e.job.clone()).collect())
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<Job, JobError> {
        self.mutate(id, |job| job.apply_progress(progress, message))
            .await
    }

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, JobError> {
        let result = self
            .mutate(id, |job| job.apply_transition(&transition, Utc::now()))
            .await;
        if let Err(ref e) = result {
            report_rejected(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojob_types::JobStatus;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(JobId, JobStatus, u8)>>);

    impl JobChangeSink for Recorder {
        fn publish(&self, job: &Job) {
            self.0.lock().unwrap().push((job.id, job.status, job.progress));
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_input_and_output() {
        let store = InMemoryJobStore::new();
        let owner = OwnerId::from("u1");
        let job = store
            .create(JobKind::BufferAnalysis, json!({ "radius": 100 }), &owner)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        store.transition(job.id, Transition::start()).await.unwrap();
        store.update_progress(job.id, 50, None).await.unwrap();
        store
            .transition(job.id, Transition::complete(json!({ "area": 31415.9 })))
            .await
            .unwrap();

        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.input, json!({ "radius": 100 }));
        assert_eq!(fetched.output, Some(json!({ "area": 31415.9 })));
        assert_eq!(fetched.progress, 100);
    }

    #[tokio::test]
    async fn create_rejects_non_object_input() {
        let store = InMemoryJobStore::new();
        let err = store
            .create(JobKind::BufferAnalysis, json!("radius=100"), &OwnerId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
        assert!(store.list(&JobQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert_eq!(store.get(id).await.unwrap_err(), JobError::NotFound(id));
        assert!(matches!(
            store.transition(id, Transition::start()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_by_owner_filters_and_orders_newest_first() {
        let store = InMemoryJobStore::new();
        let u1 = OwnerId::from("u1");
        let u2 = OwnerId::from("u2");
        let mut u1_completed = Vec::new();
        for i in 0..3 {
            let job = store
                .create(JobKind::BufferAnalysis, json!({ "radius": i }), &u1)
                .await
                .unwrap();
            store.transition(job.id, Transition::start()).await.unwrap();
            store
                .transition(job.id, Transition::complete(json!({})))
                .await
                .unwrap();
            u1_completed.push(job.id);
        }
        store
            .create(JobKind::BufferAnalysis, json!({}), &u1)
            .await
            .unwrap();
        let other = store
            .create(JobKind::BufferAnalysis, json!({}), &u2)
            .await
            .unwrap();
        store.transition(other.id, Transition::start()).await.unwrap();
        store
            .transition(other.id, Transition::complete(json!({})))
            .await
            .unwrap();

        let listed = store
            .list_by_owner(&u1, Some(JobStatus::Completed))
            .await
            .unwrap();
        let ids: Vec<JobId> = listed.iter().map(|j| j.id).collect();
        u1_completed.reverse();
        assert_eq!(ids, u1_completed);

        let limited = store
            .list(&JobQuery::for_owner(u1.clone()).with_limit(Some(2)))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let stats = store.stats(Some(&u1)).await.unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(store.stats(None).await.unwrap().total(), 5);
    }

    #[tokio::test]
    async fn concurrent_transitions_from_same_state_have_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        for _ in 0..20 {
            let job = store
                .create(JobKind::Classification, json!({}), &OwnerId::from("u1"))
                .await
                .unwrap();
            let a = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.transition(job.id, Transition::start()).await })
            };
            let b = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.transition(job.id, Transition::start()).await })
            };
            let results = [a.await.unwrap(), b.await.unwrap()];
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            let loser = results.into_iter().find_map(Result::err).unwrap();
            assert!(matches!(
                loser,
                JobError::InvalidTransition { .. } | JobError::Conflict { .. }
            ));
        }
    }

    #[tokio::test]
    async fn rejected_change_leaves_job_untouched() {
        let store = InMemoryJobStore::new();
        let job = store
            .create(JobKind::Classification, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        store.transition(job.id, Transition::start()).await.unwrap();
        store.update_progress(job.id, 60, None).await.unwrap();
        assert!(matches!(
            store.update_progress(job.id, 20, None).await,
            Err(JobError::Conflict { .. })
        ));
        let current = store.get(job.id).await.unwrap();
        assert_eq!(current.progress, 60);
        assert_eq!(current.version, 3);
    }

    #[tokio::test]
    async fn sink_sees_every_commit_in_order() {
        let recorder = Arc::new(Recorder::default());
        let store = InMemoryJobStore::with_sink(recorder.clone());
        let job = store
            .create(JobKind::NdviCalculation, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        store.transition(job.id, Transition::start()).await.unwrap();
        store.update_progress(job.id, 50, None).await.unwrap();
        let _ = store.update_progress(job.id, 10, None).await;
        store.transition(job.id, Transition::cancel()).await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (job.id, JobStatus::Pending, 0),
                (job.id, JobStatus::Processing, 0),
                (job.id, JobStatus::Processing, 50),
                (job.id, JobStatus::Cancelled, 50),
            ]
        );
    }
}
