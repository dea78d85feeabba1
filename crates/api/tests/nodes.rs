//! `/api/v1/nodes` over the full middleware stack.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, build_test_app, delete, expect_data, get, post_empty, post_json, put_json,
    register_node,
};
use serde_json::json;

#[tokio::test]
async fn register_returns_node_without_credentials() {
    let app = build_test_app().await;
    let node = register_node(&app.router, "http").await;

    assert_eq!(node["name"], "http-node");
    assert_eq!(node["connectionType"], "http");
    assert_eq!(node["status"], "online");
    assert_eq!(node["httpPort"], 9090);
    let body = node.to_string();
    assert!(!body.contains("secret"));
    assert!(node.get("password").is_none());
}

#[tokio::test]
async fn register_without_host_is_validation_error() {
    let app = build_test_app().await;
    let response = post_json(&app.router, "/api/v1/nodes", json!({"name": "no-host"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn list_reflects_current_reachability() {
    let app = build_test_app().await;
    register_node(&app.router, "http").await;

    app.http.set_reachable(false);
    let nodes = expect_data(get(&app.router, "/api/v1/nodes").await, StatusCode::OK).await;
    assert_eq!(nodes.as_array().unwrap().len(), 1);
    assert_eq!(nodes[0]["status"], "offline");
}

#[tokio::test]
async fn get_update_delete() {
    let app = build_test_app().await;
    let node = register_node(&app.router, "ssh").await;
    let path = format!("/api/v1/nodes/{}", node["id"].as_str().unwrap());

    let fetched = expect_data(get(&app.router, &path).await, StatusCode::OK).await;
    assert_eq!(fetched["id"], node["id"]);

    let updated = expect_data(
        put_json(&app.router, &path, json!({"name": "renamed", "location": "rack 4"})).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(updated["name"], "renamed");
    assert_eq!(updated["location"], "rack 4");

    assert_eq!(delete(&app.router, &path).await.status(), StatusCode::NO_CONTENT);
    let missing = get(&app.router, &path).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn failed_test_still_answers_200_with_hints() {
    let app = build_test_app().await;
    let node = register_node(&app.router, "ssh").await;
    app.ssh.set_reachable(false);

    let path = format!("/api/v1/nodes/{}/test", node["id"].as_str().unwrap());
    let result = expect_data(post_empty(&app.router, &path).await, StatusCode::OK).await;
    assert_eq!(result["status"], "offline");
    assert!(!result["troubleshooting"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn verify_reports_setup() {
    let app = build_test_app().await;
    let node = register_node(&app.router, "http").await;

    let path = format!("/api/v1/nodes/{}/verify", node["id"].as_str().unwrap());
    let report = expect_data(post_empty(&app.router, &path).await, StatusCode::OK).await;
    assert!(report["checks"].as_array().unwrap().is_empty());
    assert!(report["message"].is_string());
}
