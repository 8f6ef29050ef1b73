//! Land-cover classification of index-valued pixels, delegated to a pluggable classifier.

use crate::artifact::job_artifact_key;
use crate::params::{percent, series};
use crate::{ArtifactStore, Checkpoint, Operation, OperationError, OperationOutput};
use async_trait::async_trait;
use geojob_types::JobKind;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Endpoint unreachable, timed out or overloaded; worth retrying.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier rejected request: {0}")]
    Rejected(String),
}

impl From<ClassifierError> for OperationError {
    fn from(e: ClassifierError) -> Self {
        match e {
            ClassifierError::Unavailable(msg) => OperationError::Transient(msg),
            ClassifierError::Rejected(msg) => OperationError::Failed(msg),
        }
    }
}

/// Assigns one class label per pixel.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, pixels: &[f64]) -> Result<Vec<String>, ClassifierError>;
}

/// Local classifier: the first band whose upper bound exceeds the value wins.
pub struct ThresholdClassifier {
    bands: Vec<(f64, String)>,
    fallback: String,
}

impl ThresholdClassifier {
    pub fn new(bands: Vec<(f64, String)>, fallback: impl Into<String>) -> Self {
        let mut bands = bands;
        bands.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            bands,
            fallback: fallback.into(),
        }
    }

    /// Vegetation-index scheme: water, urban, agriculture, forest.
    pub fn land_cover() -> Self {
        Self::new(
            vec![
                (0.0, "water".to_string()),
                (0.2, "urban".to_string()),
                (0.4, "agriculture".to_string()),
            ],
            "forest",
        )
    }

    fn label(&self, value: f64) -> &str {
        self.bands
            .iter()
            .find(|(upper, _)| value < *upper)
            .map(|(_, label)| label.as_str())
            .unwrap_or(&self.fallback)
    }
}

#[async_trait]
impl Classifier for ThresholdClassifier {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn classify(&self, pixels: &[f64]) -> Result<Vec<String>, ClassifierError> {
        Ok(pixels.iter().map(|v| self.label(*v).to_string()).collect())
    }
}

pub struct Classification {
    artifacts: Arc<dyn ArtifactStore>,
    classifier: Arc<dyn Classifier>,
}

impl Classification {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            artifacts,
            classifier,
        }
    }
}

#[async_trait]
impl Operation for Classification {
    fn kind(&self) -> JobKind {
        JobKind::Classification
    }

    fn validate(&self, input: &Value) -> Result<(), OperationError> {
        series(input, "pixels").map(|_| ())
    }

    async fn execute(
        &self,
        input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        let pixels = series(input, "pixels")?;
        let labels = self.classifier.classify(&pixels).await?;
        if labels.len() != pixels.len() {
            return Err(OperationError::Failed(format!(
                "classifier returned {} labels for {} pixels",
                labels.len(),
                pixels.len()
            )));
        }
        checkpoint.report(50, "pixels classified").await?;

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in &labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        let n = labels.len();
        let dominant = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(label, _)| label.to_string());
        let classes: serde_json::Map<String, Value> = counts
            .iter()
            .map(|(label, count)| {
                (
                    label.to_string(),
                    json!({ "count": count, "percent": percent(*count, n) }),
                )
            })
            .collect();

        let bytes = serde_json::to_vec(&json!({ "labels": labels }))
            .map_err(|e| OperationError::Failed(format!("encode result: {e}")))?;
        let key = job_artifact_key(checkpoint.job_id(), "classification.json");
        let artifact = self.artifacts.put(&key, "application/json", bytes).await?;
        checkpoint.report(90, "result stored").await?;

        Ok(OperationOutput {
            result: json!({ "classes": classes, "dominant_class": dominant }),
            metrics: json!({
                "pixel_count": n,
                "class_count": counts.len(),
                "classifier": self.classifier.name(),
            }),
            artifact: Some(artifact),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::testing::RecordingCheckpoint;
    use crate::InMemoryArtifactStore;

    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        fn name(&self) -> &str {
            "down"
        }

        async fn classify(&self, _pixels: &[f64]) -> Result<Vec<String>, ClassifierError> {
            Err(ClassifierError::Unavailable("503 from upstream".to_string()))
        }
    }

    #[tokio::test]
    async fn threshold_bands_are_ordered() {
        let c = ThresholdClassifier::land_cover();
        let labels = c.classify(&[-0.3, 0.1, 0.3, 0.7]).await.unwrap();
        assert_eq!(labels, vec!["water", "urban", "agriculture", "forest"]);
    }

    #[tokio::test]
    async fn classification_reports_coverage_and_dominant_class() {
        let op = Classification::new(
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(ThresholdClassifier::land_cover()),
        );
        let checkpoint = RecordingCheckpoint::new();
        let out = op
            .execute(&json!({ "pixels": [0.6, 0.7, 0.8, -0.1] }), &checkpoint)
            .await
            .unwrap();
        assert_eq!(out.result["dominant_class"], "forest");
        assert_eq!(out.result["classes"]["forest"]["percent"], 75.0);
        assert_eq!(out.result["classes"]["water"]["count"], 1);
        assert_eq!(out.metrics["classifier"], "threshold");
    }

    #[tokio::test]
    async fn unavailable_classifier_is_transient() {
        let op = Classification::new(
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(DownClassifier),
        );
        let err = op
            .execute(&json!({ "pixels": [0.1] }), &RecordingCheckpoint::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
