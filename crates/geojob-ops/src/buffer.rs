//! Buffer analysis: polygonal buffers of a fixed radius around input points.
//!
//! Input: `radius` (> 0, planar units), optional `points` (`[[x, y], ..]`, defaults to the
//! origin) and optional `segments` (8..=256, default 32) for the circle approximation.

use crate::artifact::job_artifact_key;
use crate::params::{as_object, number, required_number};
use crate::{ArtifactStore, Checkpoint, Operation, OperationError, OperationOutput};
use async_trait::async_trait;
use geojob_types::JobKind;
use serde_json::{json, Value};
use std::f64::consts::PI;
use std::sync::Arc;

const DEFAULT_SEGMENTS: usize = 32;

pub struct BufferAnalysis {
    artifacts: Arc<dyn ArtifactStore>,
}

struct Params {
    radius: f64,
    points: Vec<[f64; 2]>,
    segments: usize,
}

impl BufferAnalysis {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    fn params(input: &Value) -> Result<Params, OperationError> {
        let radius = required_number(input, "radius")?;
        if radius <= 0.0 {
            return Err(OperationError::InvalidInput(
                "`radius` must be greater than zero".to_string(),
            ));
        }
        let segments = match number(input, "segments")? {
            None => DEFAULT_SEGMENTS,
            Some(s) if s.fract() == 0.0 && (8.0..=256.0).contains(&s) => s as usize,
            Some(_) => {
                return Err(OperationError::InvalidInput(
                    "`segments` must be an integer between 8 and 256".to_string(),
                ))
            }
        };
        let points = match as_object(input)?.get("points") {
            None | Some(Value::Null) => vec![[0.0, 0.0]],
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(parse_point)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    OperationError::InvalidInput(
                        "`points` must be a list of [x, y] coordinate pairs".to_string(),
                    )
                })?,
            Some(_) => {
                return Err(OperationError::InvalidInput(
                    "`points` must be a non-empty list of [x, y] pairs".to_string(),
                ))
            }
        };
        Ok(Params {
            radius,
            points,
            segments,
        })
    }
}

fn parse_point(v: &Value) -> Option<[f64; 2]> {
    match v.as_array()?.as_slice() {
        [x, y] => {
            let (x, y) = (x.as_f64()?, y.as_f64()?);
            (x.is_finite() && y.is_finite()).then_some([x, y])
        }
        _ => None,
    }
}

/// Closed ring approximating a circle.
fn circle_ring(center: [f64; 2], radius: f64, segments: usize) -> Vec<[f64; 2]> {
    let mut ring: Vec<[f64; 2]> = (0..segments)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / segments as f64;
            [
                center[0] + radius * angle.cos(),
                center[1] + radius * angle.sin(),
            ]
        })
        .collect();
    ring.push(ring[0]);
    ring
}

/// Shoelace area of a closed ring.
fn ring_area(ring: &[[f64; 2]]) -> f64 {
    let twice: f64 = ring
        .windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum();
    twice.abs() / 2.0
}

#[async_trait]
impl Operation for BufferAnalysis {
    fn kind(&self) -> JobKind {
        JobKind::BufferAnalysis
    }

    fn validate(&self, input: &Value) -> Result<(), OperationError> {
        Self::params(input).map(|_| ())
    }

    async fn execute(
        &self,
        input: &Value,
        checkpoint: &dyn Checkpoint,
    ) -> Result<OperationOutput, OperationError> {
        let params = Self::params(input)?;

        let mut features = Vec::with_capacity(params.points.len());
        let mut total_area = 0.0;
        for (index, point) in params.points.iter().enumerate() {
            let ring = circle_ring(*point, params.radius, params.segments);
            let area = ring_area(&ring);
            total_area += area;
            features.push(json!({
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": [ring] },
                "properties": { "source_index": index, "radius": params.radius, "area": area },
            }));
        }
        checkpoint.report(50, "buffers computed").await?;

        let collection = json!({ "type": "FeatureCollection", "features": features });
        let bytes = serde_json::to_vec(&collection)
            .map_err(|e| OperationError::Failed(format!("encode result: {e}")))?;
        let key = job_artifact_key(checkpoint.job_id(), "buffer_analysis.geojson");
        let artifact = self
            .artifacts
            .put(&key, "application/geo+json", bytes)
            .await?;
        checkpoint.report(90, "result stored").await?;

        let feature_count = params.points.len();
        Ok(OperationOutput {
            result: json!({
                "feature_count": feature_count,
                "radius": params.radius,
                "total_area": total_area,
            }),
            metrics: json!({
                "segments": params.segments,
                "mean_area": total_area / feature_count as f64,
            }),
            artifact: Some(artifact),
        })
    }
}
