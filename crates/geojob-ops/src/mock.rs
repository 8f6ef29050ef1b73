//! Scripted operations for runner and API tests: no artifacts, no network.

use crate::{Checkpoint, Operation, OperationError, OperationOutput};
use async_trait::async_trait;
use geojob_types::JobKind;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails with a transient error for the first `failures` attempts, then succeeds.
pub struct FlakyOperation {
    kind: JobKind,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyOperation {
    pub fn new(kind: JobKind, failures: usize) -> Self {
        Self {
            kind,
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for FlakyOperation {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn validate(&self, _input: &Value) -> Result<(), OperationError> {
        Ok(())
    }

    async fn execute(
        &self,
        _input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        checkpoint.report(10, "attempt started").await?;
        if attempt <= self.failures {
            return Err(OperationError::Transient(format!(
                "upstream unavailable (attempt {attempt})"
            )));
        }
        checkpoint.report(60, "attempt succeeded").await?;
        Ok(OperationOutput {
            result: json!({ "attempts": attempt }),
            metrics: json!({}),
            artifact: None,
        })
    }
}

/// Reports progress in `steps` increments with `delay` between them.
pub struct SlowOperation {
    kind: JobKind,
    steps: u8,
    delay: Duration,
}

impl SlowOperation {
    pub fn new(kind: JobKind, steps: u8, delay: Duration) -> Self {
        Self {
            kind,
            steps: steps.clamp(1, 99),
            delay,
        }
    }
}

#[async_trait]
impl Operation for SlowOperation {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn validate(&self, _input: &Value) -> Result<(), OperationError> {
        Ok(())
    }

    async fn execute(
        &self,
        _input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        for step in 1..=self.steps {
            tokio::time::sleep(self.delay).await;
            let progress = (u16::from(step) * 90 / u16::from(self.steps)) as u8;
            checkpoint.report(progress, "working").await?;
        }
        Ok(OperationOutput {
            result: json!({ "steps": self.steps }),
            metrics: json!({}),
            artifact: None,
        })
    }
}

/// Always fails permanently with `message`.
pub struct FailingOperation {
    kind: JobKind,
    message: String,
}

impl FailingOperation {
    pub fn new(kind: JobKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Operation for FailingOperation {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn validate(&self, _input: &Value) -> Result<(), OperationError> {
        Ok(())
    }

    async fn execute(
        &self,
        _input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        checkpoint.report(20, "about to fail").await?;
        Err(OperationError::Failed(self.message.clone()))
    }
}
