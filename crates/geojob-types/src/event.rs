//! Change notifications carrying full job snapshots.

use crate::{Job, JobId, JobQuery, JobStatus, OwnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a snapshot represents, derived from the snapshot itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "job_created",
            ChangeKind::Started => "job_started",
            ChangeKind::Progress => "job_progress",
            ChangeKind::Completed => "job_completed",
            ChangeKind::Failed => "job_failed",
            ChangeKind::Cancelled => "job_cancelled",
        }
    }
}

/// A job state change. Always the full current snapshot, never a diff, so the latest event
/// alone is enough to rebuild a job's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobChangeEvent {
    pub job: Job,
    pub observed_at: DateTime<Utc>,
}

impl JobChangeEvent {
    pub fn now(job: Job) -> Self {
        Self {
            job,
            observed_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self.job.status {
            JobStatus::Pending => ChangeKind::Created,
            JobStatus::Processing if self.job.progress == 0 => ChangeKind::Started,
            JobStatus::Processing => ChangeKind::Progress,
            JobStatus::Completed => ChangeKind::Completed,
            JobStatus::Failed => ChangeKind::Failed,
            JobStatus::Cancelled => ChangeKind::Cancelled,
        }
    }
}

/// Which changes a subscriber wants. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub owner: Option<OwnerId>,
    pub job_id: Option<JobId>,
    pub statuses: Option<Vec<JobStatus>>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_owner(owner: OwnerId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    pub fn for_job(id: JobId) -> Self {
        Self {
            job_id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<JobStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner.as_ref().map_or(true, |o| &job.owner == o)
            && self.job_id.map_or(true, |id| job.id == id)
            && self
                .statuses
                .as_ref()
                .map_or(true, |s| s.contains(&job.status))
    }

    /// Store query covering at least every job this filter can match.
    pub fn as_query(&self) -> JobQuery {
        JobQuery {
            owner: self.owner.clone(),
            status: None,
            limit: None,
        }
    }
}
