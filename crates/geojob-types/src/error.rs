//! Error taxonomy shared by every job store backend.

use crate::{JobId, JobStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Caller-supplied parameters were rejected before a job record existed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// The requested status change is not an edge of the job state machine.
    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    /// Concurrent mutation detected; re-read and retry.
    #[error("conflict on job {id}: {reason}")]
    Conflict { id: JobId, reason: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of a cancel request. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was moved to Cancelled immediately.
    Cancelled,
    /// The owning worker was signalled and cancels at its next checkpoint.
    Requested,
    /// The job had already finished; nothing changed.
    AlreadyTerminal { status: JobStatus },
}
