//! Route definitions for the `/nodes` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::nodes;
use crate::state::AppState;

/// Routes mounted at `/nodes`.
///
/// ```text
/// GET    /                -> list_nodes
/// POST   /                -> register_node
/// GET    /{id}            -> get_node
/// PUT    /{id}            -> update_node
/// DELETE /{id}            -> delete_node
/// POST   /{id}/test       -> test_node
/// POST   /{id}/verify     -> verify_node
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(nodes::list_nodes).post(nodes::register_node))
        .route(
            "/{id}",
            get(nodes::get_node)
                .put(nodes::update_node)
                .delete(nodes::delete_node),
        )
        .route("/{id}/test", post(nodes::test_node))
        .route("/{id}/verify", post(nodes::verify_node))
}
