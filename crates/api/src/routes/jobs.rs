//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> create_job
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> delete_job
/// POST   /{id}/cancel     -> cancel_job
/// POST   /{id}/refresh    -> refresh_job
/// GET    /{id}/outputs    -> list_outputs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/refresh", post(jobs::refresh_job))
        .route("/{id}/outputs", get(jobs::list_outputs))
}

/// Artifact downloads, merged into `/api/v1` outside the request timeout.
///
/// ```text
/// GET    /jobs/{id}/download          -> download_output
/// GET    /jobs/{id}/download/{name}   -> download_named_output
/// ```
pub fn download_router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}/download", get(jobs::download_output))
        .route("/jobs/{id}/download/{name}", get(jobs::download_named_output))
}
