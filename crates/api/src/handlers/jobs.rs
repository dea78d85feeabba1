//! Handlers for the `/jobs` resource.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use vidfleet_core::job::CreateJob;
use vidfleet_engine::JobDownload;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Stores the job as `pending` and dispatches it in the background.
/// Returns 201 with the created job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.create(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs
///
/// Newest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.dispatcher.list().await;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.get(&id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.dispatcher.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{id}/cancel
///
/// 409 when the job is already terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.cancel(&id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/refresh
pub async fn refresh_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.dispatcher.refresh(&id).await?;
    Ok(Json(DataResponse { data: outcome }))
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/outputs
pub async fn list_outputs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let outputs = state.dispatcher.outputs(&id).await?;
    Ok(Json(DataResponse { data: outputs }))
}

/// GET /api/v1/jobs/{id}/download
pub async fn download_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let download = state.dispatcher.download(&id, None).await?;
    stream_response(download)
}

/// GET /api/v1/jobs/{id}/download/{name}
pub async fn download_named_output(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> AppResult<Response> {
    let download = state.dispatcher.download(&id, Some(&name)).await?;
    stream_response(download)
}

fn stream_response(download: JobDownload) -> AppResult<Response> {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.file_name.replace('"', "")
    );
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, download.content_type)
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = download.content_length {
        builder = builder.header(header::CONTENT_LENGTH, length.to_string());
    }
    builder
        .body(Body::from_stream(download.stream))
        .map_err(|e| AppError::InternalError(format!("Failed to build download response: {e}")))
}
