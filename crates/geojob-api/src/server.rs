//! Axum server and routes.

use crate::auth::CallerPrincipal;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use geojob_publisher::StatusPublisher;
use geojob_runner::{Scheduler, SchedulerError};
use geojob_types::{
    ArtifactRef, CancelOutcome, Job, JobError, JobId, JobKind, JobQuery, JobStats, JobStatus,
    JobStore, OwnerId, Principal, SubscriptionFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;

/// Queue listings return at most this many jobs unless the caller asks for fewer.
pub const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Response envelope. Transport status is always 200; `code` carries the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        })
    }

    pub fn error(code: i32, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code,
            message: message.into(),
            data: None,
        })
    }
}

fn job_error<T>(e: &JobError) -> Json<ApiResponse<T>> {
    let code = match e {
        JobError::InvalidInput(_) => 400,
        JobError::NotFound(_) => 404,
        JobError::InvalidTransition { .. } | JobError::Conflict { .. } => 409,
        JobError::Storage(_) => {
            tracing::error!(error = %e, "storage failure");
            500
        }
    };
    ApiResponse::error(code, e.to_string())
}

fn scheduler_error<T>(e: &SchedulerError) -> Json<ApiResponse<T>> {
    match e {
        SchedulerError::Job(e) => job_error(e),
        SchedulerError::Other(msg) => {
            tracing::error!(error = %msg, "scheduler failure");
            ApiResponse::error(500, msg.clone())
        }
    }
}

pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub publisher: Arc<dyn StatusPublisher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/jobs", post(handle_submit).get(handle_list))
        .route("/jobs/stats", get(handle_stats))
        .route("/jobs/events", get(handle_events))
        .route("/jobs/:id", get(handle_get))
        .route("/jobs/:id/cancel", post(handle_cancel))
        .route("/jobs/:id/result", get(handle_result))
        .route("/jobs/:id/download", get(handle_download))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Load a job the caller may see. Jobs owned by someone else read as missing.
async fn visible_job<T>(
    state: &AppState,
    principal: &Principal,
    raw_id: &str,
) -> Result<Job, Json<ApiResponse<T>>> {
    let id: JobId = raw_id
        .parse()
        .map_err(|_| ApiResponse::error(400, format!("invalid job id: {raw_id}")))?;
    match state.store.get(id).await {
        Ok(job) if principal.can_access(&job) => Ok(job),
        Ok(_) => Err(job_error(&JobError::NotFound(id))),
        Err(e) => Err(job_error(&e)),
    }
}

/// `all=true` widens a query to every owner and needs an elevated role.
fn scope<T>(principal: &Principal, all: bool) -> Result<Option<&OwnerId>, Json<ApiResponse<T>>> {
    if !all {
        return Ok(Some(&principal.id));
    }
    if principal.is_elevated() {
        Ok(None)
    } else {
        Err(ApiResponse::error(403, "listing all jobs requires the admin role"))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub kind: String,
    #[serde(default = "empty_object")]
    pub input: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

async fn handle_submit(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Json(req): Json<SubmitRequest>,
) -> Json<ApiResponse<Job>> {
    let kind: JobKind = match req.kind.parse() {
        Ok(kind) => kind,
        Err(e) => return job_error(&e),
    };
    match state.scheduler.submit(kind, req.input, &principal.id).await {
        Ok(job) => ApiResponse::ok(job),
        Err(e) => scheduler_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub all: Option<bool>,
}

async fn handle_list(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Query(q): Query<ListQuery>,
) -> Json<ApiResponse<Vec<Job>>> {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<JobStatus>() {
            Ok(status) => Some(status),
            Err(e) => return job_error(&e),
        },
    };
    let owner = match scope(&principal, q.all.unwrap_or(false)) {
        Ok(owner) => owner.cloned(),
        Err(rejection) => return rejection,
    };
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let query = JobQuery {
        owner,
        status,
        limit: Some(limit),
    };
    match state.store.list(&query).await {
        Ok(jobs) => ApiResponse::ok(jobs),
        Err(e) => job_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub all: Option<bool>,
}

async fn handle_stats(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Query(q): Query<ScopeQuery>,
) -> Json<ApiResponse<JobStats>> {
    let owner = match scope(&principal, q.all.unwrap_or(false)) {
        Ok(owner) => owner,
        Err(rejection) => return rejection,
    };
    match state.store.stats(owner).await {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => job_error(&e),
    }
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Path(id): Path<String>,
) -> Json<ApiResponse<Job>> {
    match visible_job(&state, &principal, &id).await {
        Ok(job) => ApiResponse::ok(job),
        Err(rejection) => rejection,
    }
}

async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Path(id): Path<String>,
) -> Json<ApiResponse<CancelOutcome>> {
    let job = match visible_job(&state, &principal, &id).await {
        Ok(job) => job,
        Err(rejection) => return rejection,
    };
    match state.scheduler.cancel(job.id).await {
        Ok(outcome) => {
            tracing::info!(job_id = %job.id, caller = %principal.id, ?outcome, "cancel handled");
            ApiResponse::ok(outcome)
        }
        Err(e) => scheduler_error(&e),
    }
}

async fn handle_result(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Path(id): Path<String>,
) -> Json<ApiResponse<serde_json::Value>> {
    let job = match visible_job(&state, &principal, &id).await {
        Ok(job) => job,
        Err(rejection) => return rejection,
    };
    match (job.status, job.output) {
        (JobStatus::Completed, Some(output)) => ApiResponse::ok(output),
        (status, _) => ApiResponse::error(409, format!("job is {status}; no result available")),
    }
}

async fn handle_download(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Path(id): Path<String>,
) -> Json<ApiResponse<ArtifactRef>> {
    let job = match visible_job(&state, &principal, &id).await {
        Ok(job) => job,
        Err(rejection) => return rejection,
    };
    if job.status != JobStatus::Completed {
        return ApiResponse::error(409, format!("job is {}; nothing to download", job.status));
    }
    match job.artifact() {
        Some(artifact) => ApiResponse::ok(artifact),
        None => ApiResponse::error(409, "job produced no downloadable artifact"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub all: Option<bool>,
    #[serde(default)]
    pub job_id: Option<String>,
}

async fn handle_events(
    State(state): State<Arc<AppState>>,
    CallerPrincipal(principal): CallerPrincipal,
    Query(q): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, Json<ApiResponse<()>>> {
    // A single visible job needs no owner scope; access was checked on lookup.
    let (owner, job_id) = match q.job_id.as_deref() {
        None => (scope(&principal, q.all.unwrap_or(false))?.cloned(), None),
        Some(raw) => (None, Some(visible_job::<()>(&state, &principal, raw).await?.id)),
    };
    let filter = SubscriptionFilter {
        owner,
        job_id,
        statuses: None,
    };
    tracing::debug!(caller = %principal.id, ?filter, "event stream opened");
    let stream = state
        .publisher
        .subscribe(filter)
        .map(|event| Event::default().event(event.kind().as_str()).json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn handle_health() -> &'static str {
    "ok"
}
