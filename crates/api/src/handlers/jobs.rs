//! Handlers for the `/jobs` resource: lifecycle operations, queue
//! diagnostics, the live event stream, and artifact downloads.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use slidemill_core::error::CoreError;
use slidemill_core::job::{Job, JobState, JobType, Manifest};
use slidemill_core::types::{FileId, JobId, WorkflowId};
use slidemill_engine::QueueStatus;

use crate::error::{AppError, AppResult};
use crate::handlers::events::sse_from_subscriber;
use crate::state::AppState;
use crate::tenant::Tenant;

/// Request body for POST /jobs.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub workflow_id: WorkflowId,
    pub file_id: FileId,
    /// Wire name of the job type; rejected as INVALID when unknown.
    pub job_type: String,
    #[serde(default)]
    pub branch: String,
}

/// POST /api/v1/jobs
pub async fn create(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<(StatusCode, Json<Job>)> {
    // The job-type set is closed; anything else is an INVALID request,
    // not a deserialization failure.
    let job_type = match input.job_type.as_str() {
        "SEGMENT_CELLS" => JobType::SegmentCells,
        "TISSUE_MASK" => JobType::TissueMask,
        other => {
            return Err(AppError::Core(CoreError::Invalid(format!(
                "unknown job type: {other}"
            ))))
        }
    };

    state.files.get(&tenant, input.file_id).await?;
    let job = state
        .store
        .create_job(
            &tenant,
            input.workflow_id,
            input.file_id,
            job_type,
            input.branch,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs/{id}
pub async fn get_by_id(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Job>> {
    let job = state.store.get_job(&tenant, id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/{id}/start
///
/// Enqueues the job; it stays PENDING until the scheduler admits it.
pub async fn start(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<(StatusCode, Json<Job>)> {
    state.store.get_job(&tenant, id).await?;
    state.scheduler.start(id).await?;
    let job = state.store.get_job(&tenant, id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// PENDING jobs only; admitted jobs run to their own terminal state.
pub async fn cancel(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Job>> {
    state.store.get_job(&tenant, id).await?;
    let job = state.scheduler.cancel(id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/{id}/retry
///
/// Resets any terminal job to PENDING and re-enqueues it at the tail.
pub async fn retry(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Job>> {
    state.store.get_job(&tenant, id).await?;
    let job = state.scheduler.retry(id).await?;
    Ok(Json(job))
}

/// GET /api/v1/jobs/{id}/queue
pub async fn queue_status(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<QueueStatus>> {
    let job = state.store.get_job(&tenant, id).await?;
    let status = state.scheduler.queue_status(&job).await;
    Ok(Json(status))
}

/// GET /api/v1/jobs/{id}/events
pub async fn subscribe(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    state.store.get_job(&tenant, id).await?;
    let subscriber = state.bus.subscribe(id).await;
    Ok(sse_from_subscriber(subscriber))
}

/// GET /api/v1/jobs/{id}/manifest
///
/// Available once the job has SUCCEEDED; its presence is the atomicity
/// signal for the whole artifact set.
pub async fn manifest(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Manifest>> {
    let job = state.store.get_job(&tenant, id).await?;
    match (job.state, job.manifest) {
        (JobState::Succeeded, Some(manifest)) => Ok(Json(manifest)),
        _ => Err(AppError::Core(CoreError::Conflict(format!(
            "job {id} is {}, manifest is available on SUCCEEDED jobs only",
            job.state
        )))),
    }
}

/// GET /api/v1/jobs/{id}/preview
pub async fn preview(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    serve_artifact(&state, &tenant, id, "preview.png", "image/png").await
}

/// GET /api/v1/jobs/{id}/artifacts
pub async fn artifacts(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    serve_artifact(&state, &tenant, id, "artifacts.zip", "application/zip").await
}

async fn serve_artifact(
    state: &AppState,
    tenant: &str,
    id: JobId,
    name: &str,
    content_type: &'static str,
) -> AppResult<impl IntoResponse> {
    state.store.get_job(tenant, id).await?;
    let path = state.files.job_dir(id).join(name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::Core(CoreError::NotFound { entity: "artifact", id }))?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
