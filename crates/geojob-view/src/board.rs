//! Job board: snapshots keyed by job id, plus the actions a UI offers on each.

use chrono::{DateTime, Utc};
use geojob_runner::{Scheduler, SchedulerError};
use geojob_types::{
    ArtifactRef, CancelOutcome, Job, JobChangeEvent, JobId, JobStats, JobStatus,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Cancel,
    ViewResult,
    Download,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Cancel => "cancel",
            Action::ViewResult => "view result",
            Action::Download => "download",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("cannot {action} a {status} job")]
    ActionUnavailable { action: Action, status: JobStatus },
    #[error("job {0} has no downloadable artifact")]
    NoArtifact(JobId),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Which actions are enabled for a job in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobActions {
    pub can_cancel: bool,
    pub can_view: bool,
    pub can_download: bool,
}

impl JobActions {
    pub fn for_job(job: &Job) -> Self {
        let completed = job.status == JobStatus::Completed;
        Self {
            can_cancel: !job.is_terminal(),
            can_view: completed,
            can_download: completed && job.artifact().is_some(),
        }
    }

    fn allows(&self, action: Action) -> bool {
        match action {
            Action::Cancel => self.can_cancel,
            Action::ViewResult => self.can_view,
            Action::Download => self.can_download,
        }
    }
}

/// One display line of the job list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub title: &'static str,
    pub status_label: &'static str,
    pub progress: u8,
    pub progress_message: Option<String>,
    /// Only present for Failed jobs.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub actions: JobActions,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            title: job.kind.display_name(),
            status_label: job.status.label(),
            progress: job.progress,
            progress_message: job.progress_message.clone(),
            error_message: (job.status == JobStatus::Failed)
                .then(|| job.error_message.clone())
                .flatten(),
            created_at: job.created_at,
            actions: JobActions::for_job(job),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobBoard {
    jobs: HashMap<JobId, Job>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board seeded from a listing; later snapshots still only replace older ones.
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let mut board = Self::new();
        for job in jobs {
            board.apply_job(job);
        }
        board
    }

    /// Apply a change event. Returns `false` when the snapshot is stale or a duplicate.
    pub fn apply(&mut self, event: &JobChangeEvent) -> bool {
        self.apply_job(event.job.clone())
    }

    pub fn apply_job(&mut self, job: Job) -> bool {
        if let Some(current) = self.jobs.get(&job.id) {
            if !job.advances(current) {
                return false;
            }
        }
        self.jobs.insert(job.id, job);
        true
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs with `status` (all when `None`), newest first.
    pub fn filter_by_status(&self, status: Option<JobStatus>) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        jobs
    }

    pub fn rows(&self, status: Option<JobStatus>) -> Vec<JobRow> {
        self.filter_by_status(status)
            .into_iter()
            .map(JobRow::from)
            .collect()
    }

    pub fn stats(&self) -> JobStats {
        self.jobs.values().collect()
    }

    pub fn row(&self, id: JobId) -> Result<JobRow, ViewError> {
        self.require(id).map(JobRow::from)
    }

    pub fn actions(&self, id: JobId) -> Result<JobActions, ViewError> {
        self.require(id).map(JobActions::for_job)
    }

    /// Output of a Completed job.
    pub fn view_result(&self, id: JobId) -> Result<&serde_json::Value, ViewError> {
        let job = self.check(id, Action::ViewResult)?;
        job.output.as_ref().ok_or(ViewError::ActionUnavailable {
            action: Action::ViewResult,
            status: job.status,
        })
    }

    pub fn download(&self, id: JobId) -> Result<ArtifactRef, ViewError> {
        let job = self.require(id)?;
        if job.status != JobStatus::Completed {
            return Err(ViewError::ActionUnavailable {
                action: Action::Download,
                status: job.status,
            });
        }
        job.artifact().ok_or(ViewError::NoArtifact(id))
    }

    /// Ask the scheduler to cancel. Rejected locally once the board shows a terminal state.
    pub async fn cancel(
        &self,
        id: JobId,
        scheduler: &dyn Scheduler,
    ) -> Result<CancelOutcome, ViewError> {
        self.check(id, Action::Cancel)?;
        Ok(scheduler.cancel(id).await?)
    }

    fn require(&self, id: JobId) -> Result<&Job, ViewError> {
        self.jobs.get(&id).ok_or(ViewError::NotFound(id))
    }

    pub(crate) fn check(&self, id: JobId, action: Action) -> Result<&Job, ViewError> {
        let job = self.require(id)?;
        if JobActions::for_job(job).allows(action) {
            Ok(job)
        } else {
            Err(ViewError::ActionUnavailable {
                action,
                status: job.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geojob_types::{JobKind, OwnerId, Transition};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingScheduler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for CountingScheduler {
        async fn submit(
            &self,
            _kind: JobKind,
            _input: serde_json::Value,
            _owner: &OwnerId,
        ) -> Result<Job, SchedulerError> {
            Err(SchedulerError::Other("not used".to_string()))
        }

        async fn cancel(&self, _id: JobId) -> Result<CancelOutcome, SchedulerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CancelOutcome::Requested)
        }
    }

    fn job(kind: JobKind) -> Job {
        Job::new(kind, json!({}), OwnerId::from("u1"))
    }

    fn step(job: &Job, transition: Transition) -> Job {
        let mut next = job.clone();
        next.apply_transition(&transition, Utc::now()).unwrap();
        next
    }

    fn with_progress(job: &Job, progress: u8) -> Job {
        let mut next = job.clone();
        next.apply_progress(progress, None).unwrap();
        next
    }

    #[test]
    fn stale_and_duplicate_snapshots_are_ignored() {
        let pending = job(JobKind::BufferAnalysis);
        let running = step(&pending, Transition::start());
        let half = with_progress(&running, 50);
        let mut board = JobBoard::new();

        assert!(board.apply(&JobChangeEvent::now(pending.clone())));
        assert!(board.apply(&JobChangeEvent::now(half.clone())));
        assert!(!board.apply(&JobChangeEvent::now(half.clone())));
        assert!(!board.apply(&JobChangeEvent::now(running)));
        assert!(!board.apply(&JobChangeEvent::now(pending)));
        assert_eq!(board.get(half.id).unwrap().progress, 50);
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn filter_is_newest_first() {
        let mut first = job(JobKind::BufferAnalysis);
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = job(JobKind::NdviCalculation);
        let done = step(&step(&second, Transition::start()), Transition::complete(json!({})));
        let board = JobBoard::from_jobs([first.clone(), done.clone()]);

        let all: Vec<JobId> = board.filter_by_status(None).iter().map(|j| j.id).collect();
        assert_eq!(all, vec![done.id, first.id]);
        let completed = board.filter_by_status(Some(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(board.stats().pending, 1);
        assert_eq!(board.stats().completed, 1);
    }

    #[test]
    fn actions_follow_status() {
        let pending = job(JobKind::Classification);
        let completed = step(
            &step(&pending, Transition::start()),
            Transition::complete(json!({
                "result": {},
                "artifact": {
                    "key": "jobs/x/out.json",
                    "url": "memory://jobs/x/out.json",
                    "content_type": "application/json",
                    "size_bytes": 2
                }
            })),
        );
        let board = JobBoard::from_jobs([pending.clone()]);
        assert_eq!(
            board.actions(pending.id).unwrap(),
            JobActions {
                can_cancel: true,
                can_view: false,
                can_download: false
            }
        );
        assert!(matches!(
            board.view_result(pending.id),
            Err(ViewError::ActionUnavailable {
                action: Action::ViewResult,
                status: JobStatus::Pending
            })
        ));

        let board = JobBoard::from_jobs([completed.clone()]);
        let actions = board.actions(completed.id).unwrap();
        assert!(!actions.can_cancel && actions.can_view && actions.can_download);
        assert_eq!(board.download(completed.id).unwrap().key, "jobs/x/out.json");
        assert!(board.view_result(completed.id).unwrap().get("result").is_some());
    }

    #[test]
    fn download_requires_an_artifact() {
        let done = step(
            &step(&job(JobKind::ChangeDetection), Transition::start()),
            Transition::complete(json!({ "result": {} })),
        );
        let board = JobBoard::from_jobs([done.clone()]);
        assert!(matches!(board.download(done.id), Err(ViewError::NoArtifact(_))));
        assert!(matches!(
            board.download(JobId::new()),
            Err(ViewError::NotFound(_))
        ));
    }

    #[test]
    fn rows_show_error_only_for_failed_jobs() {
        let running = step(&job(JobKind::NdviCalculation), Transition::start());
        let failed = step(&running, Transition::fail("band mismatch"));
        let cancelled = step(
            &job(JobKind::NdviCalculation),
            Transition::cancel().with_error("cancelled by user"),
        );
        let board = JobBoard::from_jobs([failed.clone(), cancelled.clone()]);

        let row = board.row(failed.id).unwrap();
        assert_eq!(row.title, "NDVI Analysis");
        assert_eq!(row.status_label, JobStatus::Failed.label());
        assert_eq!(row.error_message.as_deref(), Some("band mismatch"));
        assert_eq!(board.row(cancelled.id).unwrap().error_message, None);
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_terminal() {
        let scheduler = CountingScheduler {
            calls: AtomicUsize::new(0),
        };
        let pending = job(JobKind::BufferAnalysis);
        let cancelled = step(&pending, Transition::cancel());
        let mut board = JobBoard::from_jobs([pending.clone()]);

        assert_eq!(
            board.cancel(pending.id, &scheduler).await.unwrap(),
            CancelOutcome::Requested
        );
        board.apply_job(cancelled);
        assert!(matches!(
            board.cancel(pending.id, &scheduler).await,
            Err(ViewError::ActionUnavailable {
                action: Action::Cancel,
                status: JobStatus::Cancelled
            })
        ));
        assert_eq!(scheduler.calls.load(Ordering::SeqCst), 1);
    }
}
