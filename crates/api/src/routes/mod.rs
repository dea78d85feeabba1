pub mod health;
pub mod jobs;
pub mod nodes;
pub mod upload;

use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /nodes                          list (probing), register
/// /nodes/{id}                     get, update, delete
/// /nodes/{id}/test                connectivity test (POST)
/// /nodes/{id}/verify              setup verification (POST)
///
/// /jobs                           list, create
/// /jobs/{id}                      get, delete
/// /jobs/{id}/cancel               cancel (POST)
/// /jobs/{id}/refresh              manual reconcile (POST)
/// /jobs/{id}/outputs              output listing
/// /jobs/{id}/download             stream canonical output  (untimed)
/// /jobs/{id}/download/{name}      stream named output      (untimed)
///
/// /upload/{node_id}               multipart upload         (untimed)
/// ```
pub fn api_routes(request_timeout: Duration) -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::router())
        .nest("/jobs", jobs::router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        // Transfers are bounded by the transport's own timeouts.
        .merge(jobs::download_router())
        .merge(upload::router())
}
