//! Cell-wise change detection between two co-registered rasters.

use crate::artifact::job_artifact_key;
use crate::params::{number, paired_series, percent};
use crate::{ArtifactStore, Checkpoint, Operation, OperationError, OperationOutput};
use async_trait::async_trait;
use geojob_types::JobKind;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_THRESHOLD: f64 = 0.1;

pub struct ChangeDetection {
    artifacts: Arc<dyn ArtifactStore>,
}

struct Params {
    before: Vec<f64>,
    after: Vec<f64>,
    threshold: f64,
}

impl ChangeDetection {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    fn params(input: &Value) -> Result<Params, OperationError> {
        let (before, after) = paired_series(input, "before", "after")?;
        let threshold = number(input, "threshold")?.unwrap_or(DEFAULT_THRESHOLD);
        if threshold < 0.0 {
            return Err(OperationError::InvalidInput(
                "`threshold` must not be negative".to_string(),
            ));
        }
        Ok(Params {
            before,
            after,
            threshold,
        })
    }
}

/// -1 decrease, 0 unchanged, 1 increase.
fn classify_delta(delta: f64, threshold: f64) -> i8 {
    if delta > threshold {
        1
    } else if delta < -threshold {
        -1
    } else {
        0
    }
}

#[async_trait]
impl Operation for ChangeDetection {
    fn kind(&self) -> JobKind {
        JobKind::ChangeDetection
    }

    fn validate(&self, input: &Value) -> Result<(), OperationError> {
        Self::params(input).map(|_| ())
    }

    async fn execute(
        &self,
        input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        let p = Self::params(input)?;
        let deltas: Vec<f64> = p.after.iter().zip(&p.before).map(|(a, b)| a - b).collect();
        let mask: Vec<i8> = deltas
            .iter()
            .map(|d| classify_delta(*d, p.threshold))
            .collect();
        checkpoint.report(50, "change mask computed").await?;

        let n = mask.len();
        let increased = mask.iter().filter(|m| **m > 0).count();
        let decreased = mask.iter().filter(|m| **m < 0).count();
        let changed = increased + decreased;
        let mean_delta = deltas.iter().sum::<f64>() / n as f64;

        let bytes = serde_json::to_vec(&json!({ "mask": mask }))
            .map_err(|e| OperationError::Failed(format!("encode result: {e}")))?;
        let key = job_artifact_key(checkpoint.job_id(), "change_mask.json");
        let artifact = self.artifacts.put(&key, "application/json", bytes).await?;
        checkpoint.report(90, "result stored").await?;

        Ok(OperationOutput {
            result: json!({
                "changed_cells": changed,
                "change_percentage": percent(changed, n),
                "increased_cells": increased,
                "decreased_cells": decreased,
                "mean_delta": mean_delta,
            }),
            metrics: json!({ "cell_count": n, "threshold": p.threshold }),
            artifact: Some(artifact),
        })
    }
}
