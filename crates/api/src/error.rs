use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use vidfleet_core::error::CoreError;
use vidfleet_engine::DispatchError;
use vidfleet_transport::TransportError;

static ERROR_DETAILS: OnceLock<bool> = OnceLock::new();

/// Include a `details` field with the debug rendering of each error.
///
/// Only the first call has an effect.
pub fn enable_error_details(enabled: bool) {
    let _ = ERROR_DETAILS.set(enabled);
}

fn error_details_enabled() -> bool {
    ERROR_DETAILS.get().copied().unwrap_or(false)
}

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`DispatchError`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON
/// error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Dispatch(err) => classify_dispatch_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if error_details_enabled() {
            body["details"] = json!(format!("{self:?}"));
        }

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
    }
}

/// Map engine failures onto HTTP statuses.
///
/// - Missing jobs, nodes and outputs map to 404.
/// - A job that cannot be cancelled maps to 409.
/// - An unreachable node maps to 503, any other remote failure to 502.
fn classify_dispatch_error(err: &DispatchError) -> (StatusCode, &'static str, String) {
    match err {
        DispatchError::JobNotFound(_) | DispatchError::NodeNotFound(_) | DispatchError::NoOutputs(_) => {
            (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
        }
        DispatchError::NodeUnavailable(_) => {
            (StatusCode::BAD_REQUEST, "NODE_UNAVAILABLE", err.to_string())
        }
        DispatchError::NotCancellable(_) => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        DispatchError::InvalidState(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        DispatchError::NodeUnreachable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "NODE_UNREACHABLE", err.to_string())
        }
        DispatchError::Transport(transport) => classify_transport_error(transport),
        DispatchError::Core(core) => classify_core_error(core),
        DispatchError::Store(store) => {
            tracing::error!(error = %store, "Job store error");
            internal()
        }
    }
}

fn classify_transport_error(err: &TransportError) -> (StatusCode, &'static str, String) {
    match err {
        TransportError::Unsupported { .. } => (StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string()),
        e if e.is_unreachable() => (
            StatusCode::SERVICE_UNAVAILABLE,
            "NODE_UNREACHABLE",
            err.to_string(),
        ),
        _ => {
            tracing::warn!(error = %err, "Remote node error");
            (StatusCode::BAD_GATEWAY, "REMOTE_ERROR", err.to_string())
        }
    }
}
