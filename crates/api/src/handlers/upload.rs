//! Input video upload forwarded to an HTTP node.

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use vidfleet_transport::UploadFile;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024 * 1024;

const FILE_FIELD: &str = "file";

/// POST /api/v1/upload/{node_id}
///
/// Reads the multipart `file` field and forwards it to the node's upload
/// endpoint. Returns the node's receipt, including the stored path.
pub async fn upload_input(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some(UploadFile {
            file_name,
            content_type,
            bytes,
        });
        break;
    }

    let Some(file) = upload else {
        return Err(AppError::BadRequest("No file provided".to_string()));
    };

    let receipt = state.dispatcher.upload_input(&node_id, file).await?;
    tracing::info!(node_id = %node_id, path = %receipt.path, "Input uploaded");
    Ok(Json(DataResponse { data: receipt }))
}
