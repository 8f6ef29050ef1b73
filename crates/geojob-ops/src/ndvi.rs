//! NDVI from paired near-infrared and red band samples.

use crate::artifact::job_artifact_key;
use crate::params::{paired_series, percent};
use crate::{ArtifactStore, Checkpoint, Operation, OperationError, OperationOutput};
use async_trait::async_trait;
use geojob_types::JobKind;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct NdviCalculation {
    artifacts: Arc<dyn ArtifactStore>,
}

impl NdviCalculation {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    fn bands(input: &Value) -> Result<(Vec<f64>, Vec<f64>), OperationError> {
        let (nir, red) = paired_series(input, "nir", "red")?;
        if nir.iter().chain(red.iter()).any(|v| *v < 0.0) {
            return Err(OperationError::InvalidInput(
                "band reflectance must not be negative".to_string(),
            ));
        }
        Ok((nir, red))
    }
}

pub(crate) fn ndvi(nir: f64, red: f64) -> f64 {
    let sum = nir + red;
    if sum == 0.0 {
        0.0
    } else {
        (nir - red) / sum
    }
}

#[async_trait]
impl Operation for NdviCalculation {
    fn kind(&self) -> JobKind {
        JobKind::NdviCalculation
    }

    fn validate(&self, input: &Value) -> Result<(), OperationError> {
        Self::bands(input).map(|_| ())
    }

    async fn execute(
        &self,
        input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        let (nir, red) = Self::bands(input)?;
        let values: Vec<f64> = nir.iter().zip(&red).map(|(n, r)| ndvi(*n, *r)).collect();
        checkpoint.report(50, "index computed").await?;

        let n = values.len();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / n as f64;
        let count = |pred: fn(f64) -> bool| values.iter().filter(|v| pred(**v)).count();
        let water = count(|v| v < 0.0);
        let bare = count(|v| (0.0..0.2).contains(&v));
        let sparse = count(|v| (0.2..0.5).contains(&v));
        let dense = count(|v| v >= 0.5);

        let bytes = serde_json::to_vec(&json!({ "ndvi": values }))
            .map_err(|e| OperationError::Failed(format!("encode result: {e}")))?;
        let key = job_artifact_key(checkpoint.job_id(), "ndvi.json");
        let artifact = self.artifacts.put(&key, "application/json", bytes).await?;
        checkpoint.report(90, "result stored").await?;

        Ok(OperationOutput {
            result: json!({
                "min": min,
                "max": max,
                "mean": mean,
                "coverage_percent": {
                    "water": percent(water, n),
                    "bare_soil": percent(bare, n),
                    "sparse_vegetation": percent(sparse, n),
                    "dense_vegetation": percent(dense, n),
                },
            }),
            metrics: json!({ "pixel_count": n }),
            artifact: Some(artifact),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::testing::RecordingCheckpoint;
    use crate::InMemoryArtifactStore;

    #[test]
    fn index_handles_zero_reflectance() {
        assert_eq!(ndvi(0.0, 0.0), 0.0);
        assert!((ndvi(0.8, 0.2) - 0.6).abs() < 1e-9);
        assert!(ndvi(0.1, 0.3) < 0.0);
    }

    #[test]
    fn bands_must_match_and_be_non_negative() {
        let op = NdviCalculation::new(Arc::new(InMemoryArtifactStore::new()));
        assert!(op.validate(&json!({ "nir": [0.5, 0.6], "red": [0.1, 0.2] })).is_ok());
        assert!(op.validate(&json!({ "nir": [0.5], "red": [0.1, 0.2] })).is_err());
        assert!(op.validate(&json!({ "nir": [-0.5], "red": [0.1] })).is_err());
    }

    #[tokio::test]
    async fn coverage_classes_sum_to_hundred() {
        let op = NdviCalculation::new(Arc::new(InMemoryArtifactStore::new()));
        let checkpoint = RecordingCheckpoint::new();
        let out = op
            .execute(
                &json!({ "nir": [0.1, 0.3, 0.5, 0.9], "red": [0.3, 0.3, 0.2, 0.1] }),
                &checkpoint,
            )
            .await
            .unwrap();
        let cov = &out.result["coverage_percent"];
        assert_eq!(cov["water"], 25.0);
        assert_eq!(cov["bare_soil"], 25.0);
        assert_eq!(cov["sparse_vegetation"], 25.0);
        assert_eq!(cov["dense_vegetation"], 25.0);
        assert_eq!(out.metrics["pixel_count"], 4);
        assert!(out.artifact.is_some());
    }
}
