//! Job status machine: Pending -> Processing -> {Completed, Failed}, plus cancellation from
//! Pending or Processing. Completed, Failed and Cancelled are terminal.

use crate::{Job, JobError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// Position along the state machine; terminal states share the last stage.
    pub(crate) fn stage(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| JobError::InvalidInput(format!("unknown job status: {s}")))
    }
}

/// A requested status change and the data that travels with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: JobStatus,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// When set, the change only applies if the stored version still matches.
    pub expected_version: Option<u64>,
}

impl Transition {
    pub fn to(status: JobStatus) -> Self {
        Self {
            to: status,
            output: None,
            error_message: None,
            expected_version: None,
        }
    }

    pub fn start() -> Self {
        Self::to(JobStatus::Processing)
    }

    pub fn complete(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
            ..Self::to(JobStatus::Completed)
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::to(JobStatus::Failed).with_error(message)
    }

    pub fn cancel() -> Self {
        Self::to(JobStatus::Cancelled)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

impl Job {
    /// Apply `transition` in place. Stores call this inside their per-job critical section.
    pub fn apply_transition(
        &mut self,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        if let Some(expected) = transition.expected_version {
            if expected != self.version {
                return Err(JobError::Conflict {
                    id: self.id,
                    reason: format!(
                        "expected version {expected}, found {}",
                        self.version
                    ),
                });
            }
        }
        if !self.status.can_transition_to(transition.to) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: transition.to,
            });
        }

        match transition.to {
            JobStatus::Processing => {
                self.started_at.get_or_insert(now);
                self.progress = 0;
            }
            JobStatus::Completed => {
                self.output = Some(
                    transition
                        .output
                        .clone()
                        .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
                );
                self.progress = 100;
                self.error_message = None;
            }
            JobStatus::Failed => {
                self.output = None;
                self.error_message = Some(
                    transition
                        .error_message
                        .clone()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| "operation failed".to_string()),
                );
            }
            JobStatus::Cancelled => {
                self.output = None;
                self.error_message = transition.error_message.clone();
            }
            // Never reachable: nothing transitions back to Pending.
            JobStatus::Pending => {}
        }

        if transition.to.is_terminal() {
            let finished = self.started_at.map_or(now, |started| started.max(now));
            self.completed_at.get_or_insert(finished);
        }
        self.status = transition.to;
        self.version += 1;
        Ok(())
    }

    /// Record a progress checkpoint. Only Processing jobs accept progress, and it never decreases.
    pub fn apply_progress(&mut self, progress: u8, message: Option<String>) -> Result<(), JobError> {
        if progress > 100 {
            return Err(JobError::InvalidInput(format!(
                "progress {progress} is outside 0..=100"
            )));
        }
        if self.status != JobStatus::Processing {
            return Err(JobError::Conflict {
                id: self.id,
                reason: format!("job is {}, not processing", self.status),
            });
        }
        if progress < self.progress {
            return Err(JobError::Conflict {
                id: self.id,
                reason: format!("progress would decrease from {} to {progress}", self.progress),
            });
        }
        self.progress = progress;
        if message.is_some() {
            self.progress_message = message;
        }
        self.version += 1;
        Ok(())
    }
}
