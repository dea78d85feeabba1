use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;

use crate::handlers::upload::{self, MAX_UPLOAD_BYTES};
use crate::state::AppState;

/// Input video upload, merged into `/api/v1` outside the request timeout.
///
/// ```text
/// POST   /upload/{node_id}   -> upload_input
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload/{node_id}", post(upload::upload_input))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
