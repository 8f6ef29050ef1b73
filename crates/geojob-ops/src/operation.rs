//! Operation strategy trait, checkpoints and the kind -> operation registry.

use crate::{
    ArtifactError, ArtifactStore, BufferAnalysis, ChangeDetection, Classification, Classifier,
    NdviCalculation,
};
use async_trait::async_trait;
use geojob_types::{ArtifactRef, JobError, JobId, JobKind};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Why execution must stop at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    #[error("cancellation requested")]
    Cancelled,
    /// The job left Processing underneath the worker (swept, or cancelled elsewhere).
    #[error("job is no longer processing")]
    Lost,
}

/// Progress reporting point handed to operations by the runner.
///
/// Every report is also where cancellation is observed: an `Err` means stop now and
/// discard partial work.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    fn job_id(&self) -> JobId;

    async fn report(&self, progress: u8, message: &str) -> Result<(), Interrupt>;
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A dependency was briefly unavailable; the runner may retry.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
    #[error("artifact store: {0}")]
    Artifact(#[from] ArtifactError),
}

impl OperationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperationError::Transient(_))
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutput {
    pub result: serde_json::Value,
    pub metrics: serde_json::Value,
    pub artifact: Option<ArtifactRef>,
}

impl OperationOutput {
    /// Shape stored as the job's `output`.
    pub fn into_json(self) -> serde_json::Value {
        let mut out = json!({
            "result": self.result,
            "metrics": self.metrics,
        });
        if let Some(artifact) = self.artifact {
            out["artifact"] = json!(artifact);
        }
        out
    }
}

/// A pluggable, kind-specific computation.
#[async_trait]
pub trait Operation: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Shape check run at submission, before a job record exists.
    fn validate(&self, input: &serde_json::Value) -> Result<(), OperationError>;

    /// Run against `input`, reporting through `checkpoint`. Must be a function of the input
    /// and external data only.
    async fn execute(
        &self,
        input: &serde_json::Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError>;
}

/// Maps each job kind to the operation that executes it.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    ops: HashMap<JobKind, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in operations, writing artifacts to `artifacts`.
    pub fn standard(artifacts: Arc<dyn ArtifactStore>, classifier: Arc<dyn Classifier>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BufferAnalysis::new(Arc::clone(&artifacts))));
        registry.register(Arc::new(NdviCalculation::new(Arc::clone(&artifacts))));
        registry.register(Arc::new(Classification::new(
            Arc::clone(&artifacts),
            classifier,
        )));
        registry.register(Arc::new(ChangeDetection::new(artifacts)));
        registry
    }

    /// Register (or replace) the operation for its kind.
    pub fn register(&mut self, op: Arc<dyn Operation>) -> &mut Self {
        self.ops.insert(op.kind(), op);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Operation>> {
        self.ops.get(&kind).cloned()
    }

    pub fn validate(&self, kind: JobKind, input: &serde_json::Value) -> Result<(), JobError> {
        let op = self
            .get(kind)
            .ok_or_else(|| JobError::InvalidInput(format!("no operation for kind {kind}")))?;
        op.validate(input).map_err(|e| match e {
            OperationError::InvalidInput(msg) => JobError::InvalidInput(msg),
            other => JobError::InvalidInput(other.to_string()),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryArtifactStore, ThresholdClassifier};

    fn registry() -> OperationRegistry {
        OperationRegistry::standard(
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(ThresholdClassifier::land_cover()),
        )
    }

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = registry();
        for kind in JobKind::ALL {
            assert_eq!(registry.get(kind).map(|op| op.kind()), Some(kind));
        }
    }

    #[test]
    fn validation_maps_to_invalid_input() {
        let registry = registry();
        assert!(registry
            .validate(JobKind::BufferAnalysis, &json!({ "radius": 100 }))
            .is_ok());
        assert!(matches!(
            registry.validate(JobKind::BufferAnalysis, &json!({ "radius": -1 })),
            Err(JobError::InvalidInput(_))
        ));
        assert!(matches!(
            OperationRegistry::new().validate(JobKind::BufferAnalysis, &json!({})),
            Err(JobError::InvalidInput(_))
        ));
    }

    #[test]
    fn output_json_omits_missing_artifact() {
        let out = OperationOutput {
            result: json!({ "n": 1 }),
            metrics: json!({}),
            artifact: None,
        };
        let j = out.into_json();
        assert_eq!(j["result"]["n"], 1);
        assert!(j.get("artifact").is_none());
    }
}
