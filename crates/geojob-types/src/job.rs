//! The job record and its value types.

use crate::{JobError, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a job, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Opaque identity of the principal that submitted a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Named operation a job performs; selects the strategy the runner invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    BufferAnalysis,
    NdviCalculation,
    Classification,
    ChangeDetection,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::BufferAnalysis,
        JobKind::NdviCalculation,
        JobKind::Classification,
        JobKind::ChangeDetection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::BufferAnalysis => "buffer_analysis",
            JobKind::NdviCalculation => "ndvi_calculation",
            JobKind::Classification => "classification",
            JobKind::ChangeDetection => "change_detection",
        }
    }

    /// Human-facing tool name shown in job lists.
    pub fn display_name(self) -> &'static str {
        match self {
            JobKind::BufferAnalysis => "Buffer Analysis",
            JobKind::NdviCalculation => "NDVI Analysis",
            JobKind::Classification => "AI Classification",
            JobKind::ChangeDetection => "Change Detection",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::InvalidInput(format!("unknown job kind: {s}")))
    }
}

/// Reference to a downloadable result in the object store. Jobs never hold artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// A single unit of asynchronous, trackable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    pub owner: OwnerId,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Incremented by every successful mutation.
    pub version: u64,
}

impl Job {
    /// New Pending job. Callers should run [`validate_input_shape`] first.
    pub fn new(kind: JobKind, input: serde_json::Value, owner: OwnerId) -> Self {
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: None,
            owner,
            input,
            output: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            version: 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Artifact reference carried in `output.artifact`, if the job produced one.
    pub fn artifact(&self) -> Option<ArtifactRef> {
        self.output
            .as_ref()
            .and_then(|o| o.get("artifact"))
            .filter(|a| !a.is_null())
            .and_then(|a| serde_json::from_value(a.clone()).ok())
    }

    /// Ordering key for snapshots of the same job: status stage, then progress, then version.
    /// All three only grow over a job's lifetime.
    pub fn state_key(&self) -> (u8, u8, u64) {
        (self.status.stage(), self.progress, self.version)
    }

    /// Whether this snapshot is newer than `previous` (same job id assumed).
    pub fn advances(&self, previous: &Job) -> bool {
        self.state_key() > previous.state_key()
    }
}

/// Basic shape check applied by every store on `create`.
pub fn validate_input_shape(input: &serde_json::Value, owner: &OwnerId) -> Result<(), JobError> {
    if owner.as_str().trim().is_empty() {
        return Err(JobError::InvalidInput("owner must not be empty".to_string()));
    }
    if !input.is_object() {
        return Err(JobError::InvalidInput(
            "input must be a JSON object".to_string(),
        ));
    }
    Ok(())
}

/// Filter for listing jobs. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub owner: Option<OwnerId>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobQuery {
    /// Every job, regardless of owner.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_owner(owner: OwnerId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Option<JobStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner.as_ref().map_or(true, |o| &job.owner == o)
            && self.status.map_or(true, |s| job.status == s)
    }
}

/// Count of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

impl<'a> FromIterator<&'a Job> for JobStats {
    fn from_iter<I: IntoIterator<Item = &'a Job>>(iter: I) -> Self {
        let mut stats = JobStats::default();
        for job in iter {
            stats.record(job.status);
        }
        stats
    }
}
