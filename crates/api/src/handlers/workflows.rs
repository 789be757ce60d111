//! Handlers for the `/workflows` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use slidemill_core::job::Job;
use slidemill_core::types::WorkflowId;
use slidemill_core::workflow::{Workflow, WorkflowSnapshot};

use crate::error::AppResult;
use crate::handlers::events::sse_from_subscriber;
use crate::state::AppState;
use crate::tenant::Tenant;

/// Request body for POST /workflows.
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    #[serde(default)]
    pub name: String,
}

/// POST /api/v1/workflows
pub async fn create(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Json(input): Json<CreateWorkflowRequest>,
) -> AppResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.store.create_workflow(&tenant, &input.name).await;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/v1/workflows/{id}
///
/// Returns the workflow plus its derived aggregate (state, mean
/// progress, job counts).
pub async fn get_by_id(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> AppResult<Json<WorkflowSnapshot>> {
    let snapshot = state.store.workflow_snapshot(&tenant, id).await?;
    Ok(Json(snapshot))
}

/// GET /api/v1/workflows/{id}/jobs
pub async fn list_jobs(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> AppResult<Json<Vec<Job>>> {
    let jobs = state.store.list_workflow_jobs(&tenant, id).await?;
    Ok(Json(jobs))
}

/// GET /api/v1/workflows/{id}/events
///
/// Server-sent stream of the workflow's aggregate updates.
pub async fn subscribe(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<WorkflowId>,
) -> AppResult<impl axum::response::IntoResponse> {
    // Ownership check before attaching the stream.
    state.store.workflow_snapshot(&tenant, id).await?;
    let subscriber = state.bus.subscribe(id).await;
    Ok(sse_from_subscriber(subscriber))
}
