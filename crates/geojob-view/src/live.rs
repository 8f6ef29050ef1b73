//! Job board kept current by a status stream.

use crate::{Action, JobBoard, ViewError};
use geojob_publisher::JobEventStream;
use geojob_runner::Scheduler;
use geojob_types::{CancelOutcome, JobId};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

#[derive(Clone, Default)]
pub struct LiveJobBoard {
    board: Arc<RwLock<JobBoard>>,
}

impl LiveJobBoard {
    pub fn new(board: JobBoard) -> Self {
        Self {
            board: Arc::new(RwLock::new(board)),
        }
    }

    /// Apply every event from `events` until the stream ends or the task is aborted.
    pub fn follow(&self, mut events: JobEventStream) -> JoinHandle<()> {
        let board = Arc::clone(&self.board);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let applied = board.write().await.apply(&event);
                if applied {
                    tracing::trace!(job_id = %event.job.id, kind = event.kind().as_str(), "board updated");
                }
            }
            tracing::debug!("job board stream ended");
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, JobBoard> {
        self.board.read().await
    }

    /// Like [`JobBoard::cancel`], without holding the board across the scheduler call.
    pub async fn cancel(
        &self,
        id: JobId,
        scheduler: &dyn Scheduler,
    ) -> Result<CancelOutcome, ViewError> {
        self.board.read().await.check(id, Action::Cancel)?;
        Ok(scheduler.cancel(id).await?)
    }
}
