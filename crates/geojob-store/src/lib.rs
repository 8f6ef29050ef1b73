//! Job store implementations.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use geojob_types::{JobChangeSink, JobError, JobQuery, JobStore};
pub use memory::InMemoryJobStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;

/// Log a rejected state-machine edge. These only happen through races or programming errors.
pub(crate) fn report_rejected(err: &JobError) {
    if let JobError::InvalidTransition { id, from, to } = err {
        tracing::error!(job_id = %id, from = %from, to = %to, "rejected invalid job transition");
    }
}
