//! Handlers for the `/files` resource.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

use slidemill_core::types::FileId;
use slidemill_store::StoredFile;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::tenant::Tenant;

/// POST /api/v1/files
///
/// Accepts one multipart field carrying the image blob; the original
/// filename supplies the stored extension.
pub async fn upload(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<StoredFile>)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
        .ok_or_else(|| AppError::BadRequest("request contains no file field".to_string()))?;

    let filename = field.file_name().unwrap_or("upload.bin").to_string();
    let content_type = field.content_type().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read upload: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("uploaded file is empty".to_string()));
    }

    let stored = state
        .files
        .save(&tenant, &filename, content_type, &bytes)
        .await?;
    Ok((StatusCode::CREATED, Json((*stored).clone())))
}

/// GET /api/v1/files/{id}
pub async fn get_by_id(
    Tenant(tenant): Tenant,
    State(state): State<AppState>,
    Path(id): Path<FileId>,
) -> AppResult<Json<StoredFile>> {
    let stored = state.files.get(&tenant, id).await?;
    Ok(Json((*stored).clone()))
}
