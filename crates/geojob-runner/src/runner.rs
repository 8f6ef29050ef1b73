//! Worker pool over an mpsc queue of job ids.

use crate::checkpoint::StoreCheckpoint;
use crate::config::backoff_delay;
use crate::{sanitize_error_message, RunnerConfig, Scheduler, SchedulerError};
use async_trait::async_trait;
use geojob_ops::{
    Checkpoint, Interrupt, Operation, OperationError, OperationOutput, OperationRegistry,
};
use geojob_types::{
    CancelOutcome, Job, JobError, JobId, JobKind, JobQuery, JobStatus, JobStore, OwnerId,
    Transition,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CANCELLED_MESSAGE: &str = "cancelled by user";

struct Inner {
    store: Arc<dyn JobStore>,
    registry: OperationRegistry,
    config: RunnerConfig,
    queue: mpsc::UnboundedSender<JobId>,
    /// Cancellation tokens of jobs currently executing on this runner.
    active: Mutex<HashMap<JobId, CancellationToken>>,
}

/// Runs queued jobs on a fixed pool of worker tasks.
pub struct JobRunner {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRunner {
    /// Spawn `config.workers` workers on the current runtime.
    pub fn start(
        store: Arc<dyn JobStore>,
        registry: OperationRegistry,
        config: RunnerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<JobId>();
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();
        let workers = config.workers.max(1);
        let inner = Arc::new(Inner {
            store,
            registry,
            config,
            queue: tx,
            active: Mutex::new(HashMap::new()),
        });
        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    Arc::clone(&inner),
                    Arc::clone(&rx),
                    shutdown.clone(),
                    worker,
                ))
            })
            .collect();
        tracing::info!(workers, "job runner started");
        Self {
            inner,
            shutdown,
            workers: Mutex::new(handles),
        }
    }

    /// Queue every Pending job already in the store, oldest first. Returns how many.
    pub async fn recover(&self) -> Result<usize, JobError> {
        let pending = self
            .inner
            .store
            .list(&JobQuery::all().with_status(Some(JobStatus::Pending)))
            .await?;
        let count = pending.len();
        for job in pending.into_iter().rev() {
            self.inner.enqueue(job.id)?;
        }
        if count > 0 {
            tracing::info!(count, "re-queued pending jobs");
        }
        Ok(count)
    }

    /// Stop taking new jobs and wait for workers to finish what they hold.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>,
    shutdown: CancellationToken,
    worker: usize,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                id = rx.recv() => id,
            }
        };
        let Some(id) = next else {
            break;
        };
        tracing::debug!(worker, job_id = %id, "job dequeued");
        inner.process(id).await;
    }
    tracing::debug!(worker, "worker stopped");
}

impl Inner {
    fn enqueue(&self, id: JobId) -> Result<(), JobError> {
        self.queue
            .send(id)
            .map_err(|_| JobError::Storage("job queue closed".to_string()))
    }

    async fn process(&self, id: JobId) {
        // Registered before the claim so a cancel racing the claim is never lost.
        let token = CancellationToken::new();
        self.active.lock().await.insert(id, token.clone());
        if let Some((job, outcome)) = self.claim_and_execute(id, token).await {
            self.finish(&job, outcome).await;
        }
        self.active.lock().await.remove(&id);
    }

    async fn finish(&self, job: &Job, outcome: Result<OperationOutput, OperationError>) {
        let id = job.id;
        match outcome {
            Ok(out) => {
                self.record(id, Transition::complete(out.into_json())).await;
                tracing::info!(job_id = %id, kind = %job.kind, "job completed");
            }
            Err(OperationError::Interrupted(Interrupt::Cancelled)) => {
                self.record(id, Transition::cancel().with_error(CANCELLED_MESSAGE))
                    .await;
                tracing::info!(job_id = %id, "job cancelled");
            }
            Err(OperationError::Interrupted(Interrupt::Lost)) => {
                tracing::info!(job_id = %id, "job finished elsewhere; result discarded");
            }
            Err(e) => {
                tracing::error!(job_id = %id, kind = %job.kind, error = ?e, "job failed");
                self.record(id, Transition::fail(sanitize_error_message(&e.to_string())))
                    .await;
            }
        }
    }

    async fn claim_and_execute(
        &self,
        id: JobId,
        token: CancellationToken,
    ) -> Option<(Job, Result<OperationOutput, OperationError>)> {
        let job = match self.store.transition(id, Transition::start()).await {
            Ok(job) => job,
            Err(e) => {
                tracing::info!(job_id = %id, error = %e, "claim skipped");
                return None;
            }
        };
        let Some(op) = self.registry.get(job.kind) else {
            tracing::error!(job_id = %id, kind = %job.kind, "no operation registered");
            self.record(id, Transition::fail(format!("unsupported job kind {}", job.kind)))
                .await;
            return None;
        };
        tracing::info!(job_id = %id, kind = %job.kind, owner = %job.owner, "job started");
        let checkpoint = StoreCheckpoint::new(Arc::clone(&self.store), id, token);
        let outcome = self.execute(op.as_ref(), &job, &checkpoint).await;
        Some((job, outcome))
    }

    /// All attempts for one claimed job. Only the final result is returned.
    async fn execute(
        &self,
        op: &dyn Operation,
        job: &Job,
        checkpoint: &StoreCheckpoint,
    ) -> Result<OperationOutput, OperationError> {
        checkpoint.report(0, "started").await?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let limit = self.config.attempt_timeout;
            let result = match tokio::time::timeout(limit, op.execute(&job.input, checkpoint)).await
            {
                Ok(result) => result,
                Err(_) => Err(OperationError::Transient(format!(
                    "attempt timed out after {}ms",
                    limit.as_millis()
                ))),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.config.backoff, attempt);
                    tracing::warn!(
                        job_id = %job.id,
                        kind = %job.kind,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed; retrying"
                    );
                    tokio::select! {
                        _ = checkpoint.token().cancelled() => {
                            return Err(Interrupt::Cancelled.into());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Ok(out) => {
                    checkpoint.report(100, "completed").await?;
                    return Ok(out);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record(&self, id: JobId, transition: Transition) {
        let to = transition.to;
        if let Err(e) = self.store.transition(id, transition).await {
            tracing::warn!(job_id = %id, status = %to, error = %e, "final status not recorded");
        }
    }
}

#[async_trait]
impl Scheduler for JobRunner {
    async fn submit(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        owner: &OwnerId,
    ) -> Result<Job, SchedulerError> {
        self.inner.registry.validate(kind, &input)?;
        let job = self.inner.store.create(kind, input, owner).await?;
        self.inner.enqueue(job.id)?;
        tracing::info!(job_id = %job.id, kind = %kind, owner = %owner, "job submitted");
        Ok(job)
    }

    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, SchedulerError> {
        let job = self.inner.store.get(id).await?;
        if job.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal { status: job.status });
        }
        if let Some(token) = self.inner.active.lock().await.get(&id) {
            token.cancel();
            tracing::info!(job_id = %id, "cancellation requested");
            return Ok(CancelOutcome::Requested);
        }
        let cancel = Transition::cancel().with_error(CANCELLED_MESSAGE);
        match self.inner.store.transition(id, cancel).await {
            Ok(_) => {
                tracing::info!(job_id = %id, from = %job.status, "job cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(JobError::InvalidTransition { from, .. }) if from.is_terminal() => {
                Ok(CancelOutcome::AlreadyTerminal { status: from })
            }
            Err(e) => Err(e.into()),
        }
    }
}
