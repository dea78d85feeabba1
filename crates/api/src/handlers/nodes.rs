//! Handlers for the `/nodes` resource.
//!
//! Node bodies never include credentials.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use vidfleet_core::node::{RegisterNode, UpdateNode};
use vidfleet_engine::DispatchError;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/nodes
///
/// Lists all nodes, refreshing the status of HTTP nodes first.
pub async fn list_nodes(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let nodes = state.registry.list().await;
    Ok(Json(DataResponse { data: nodes }))
}

/// POST /api/v1/nodes
pub async fn register_node(
    State(state): State<AppState>,
    Json(input): Json<RegisterNode>,
) -> AppResult<impl IntoResponse> {
    let node = state.registry.register(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: node })))
}

/// GET /api/v1/nodes/{id}
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let node = state
        .registry
        .get(&id)
        .await
        .ok_or(DispatchError::NodeNotFound(id))?;
    Ok(Json(DataResponse { data: node }))
}

/// PUT /api/v1/nodes/{id}
pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateNode>,
) -> AppResult<impl IntoResponse> {
    let node = state.registry.update(&id, &input).await?;
    Ok(Json(DataResponse { data: node }))
}

/// DELETE /api/v1/nodes/{id}
pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/nodes/{id}/test
///
/// Always 200 for a known node; the body carries the check outcome.
pub async fn test_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let result = state.registry.test(&id).await?;
    Ok(Json(DataResponse { data: result }))
}

/// POST /api/v1/nodes/{id}/verify
pub async fn verify_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let report = state.registry.verify(&id).await?;
    Ok(Json(DataResponse { data: report }))
}
