//! Kind-specific operations executed by the job runner.
//!
//! Each [`JobKind`](geojob_types::JobKind) maps to one [`Operation`] strategy in an
//! [`OperationRegistry`]. Operations write downloadable results to an [`ArtifactStore`] and
//! return only the reference.

mod artifact;
mod buffer;
mod change;
mod classify;
mod inference;
#[cfg(feature = "test-util")]
pub mod mock;
mod ndvi;
mod operation;
mod params;

pub use artifact::{ArtifactError, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use buffer::BufferAnalysis;
pub use change::ChangeDetection;
pub use classify::{Classification, Classifier, ClassifierError, ThresholdClassifier};
pub use inference::OpenAiClassifier;
pub use ndvi::NdviCalculation;
pub use operation::{
    Checkpoint, Interrupt, Operation, OperationError, OperationOutput, OperationRegistry,
};
