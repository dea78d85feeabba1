//! Shared fixtures for API integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use vidfleet_api::config::ServerConfig;
use vidfleet_api::router::build_app_router;
use vidfleet_api::state::AppState;
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::OutputDescriptor;
use vidfleet_core::pipeline::{SetupCheck, SetupReport};
use vidfleet_engine::{JobDispatcher, NodeRegistry, ReconcilePolicy};
use vidfleet_store::job_store::DEFAULT_DEBOUNCE;
use vidfleet_store::{JobPersistence, JobStore, MemoryPersistence, NodeStore};
use vidfleet_transport::{
    JobSpec, NodeTarget, OutputStream, RemoteJobStatus, RemoteJobSummary, RemoteState,
    SubmitEvent, Submission, Transport, TransportError, TransportSet, UploadFile, UploadReceipt,
};

pub const FINAL_LOG: &str = "Upscaling\nFinal video at: /workspace/output/out.mp4\n";
pub const VIDEO_BYTES: &[u8] = b"video-bytes";

/// A node that answers every call immediately.
pub struct StubNode {
    kind: ConnectionType,
    reachable: AtomicBool,
    /// Finish during submission instead of handing back a handle.
    finish: AtomicBool,
    outputs: Mutex<Vec<OutputDescriptor>>,
}

impl StubNode {
    pub fn new(kind: ConnectionType) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reachable: AtomicBool::new(true),
            finish: AtomicBool::new(false),
            outputs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn finish_on_submit(&self) {
        self.finish.store(true, Ordering::SeqCst);
    }

    pub fn set_outputs(&self, outputs: Vec<OutputDescriptor>) {
        *self.outputs.lock().unwrap() = outputs;
    }
}

#[async_trait]
impl Transport for StubNode {
    fn kind(&self) -> ConnectionType {
        self.kind
    }

    async fn test_connectivity(&self, _target: &NodeTarget, _timeout: Duration) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn submit(
        &self,
        _target: &NodeTarget,
        _spec: &JobSpec,
        _events: mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError> {
        if self.finish.load(Ordering::SeqCst) {
            Ok(Submission::Finished {
                log: FINAL_LOG.into(),
            })
        } else {
            Ok(Submission::Accepted {
                handle: "remote-1".into(),
            })
        }
    }

    async fn fetch_status(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        _timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError> {
        Ok(RemoteJobStatus::new(RemoteState::Running).with_progress(10))
    }

    async fn fetch_outputs(
        &self,
        _target: &NodeTarget,
        _handle: &str,
    ) -> Result<Vec<OutputDescriptor>, TransportError> {
        Ok(self.outputs.lock().unwrap().clone())
    }

    async fn stream_output(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        _name: Option<&str>,
    ) -> Result<OutputStream, TransportError> {
        let chunks: Vec<Result<Bytes, TransportError>> = vec![Ok(Bytes::from_static(VIDEO_BYTES))];
        Ok(OutputStream {
            content_length: None,
            stream: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn list_jobs(&self, _target: &NodeTarget) -> Result<Vec<RemoteJobSummary>, TransportError> {
        Ok(Vec::new())
    }

    async fn verify_setup(&self, _target: &NodeTarget) -> Result<SetupReport, TransportError> {
        Ok(SetupReport::from_checks(Vec::<SetupCheck>::new()))
    }

    async fn upload(
        &self,
        _target: &NodeTarget,
        file: UploadFile,
    ) -> Result<UploadReceipt, TransportError> {
        Ok(UploadReceipt {
            path: format!("input_videos/{}", file.file_name),
            filename: Some(file.file_name),
            size: Some(file.bytes.len() as u64),
        })
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jobs_file_path: PathBuf::from("unused.json"),
        persist_debounce_ms: 2000,
        app_env: "test".to_string(),
        poll_interval_secs: 5,
    }
}

/// The app router plus handles to its collaborators.
pub struct TestApp {
    pub router: Router,
    pub dispatcher: JobDispatcher,
    pub store: JobStore,
    pub http: Arc<StubNode>,
    pub ssh: Arc<StubNode>,
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(Arc::new(MemoryPersistence::new())).await
}

/// Build the full application router over stub nodes and `persistence`.
pub async fn build_test_app_with(persistence: Arc<dyn JobPersistence>) -> TestApp {
    let http = StubNode::new(ConnectionType::Http);
    let ssh = StubNode::new(ConnectionType::Ssh);
    let transports = TransportSet::new(http.clone(), ssh.clone());

    let store = JobStore::open(persistence, DEFAULT_DEBOUNCE)
        .await
        .expect("open store");
    let registry = NodeRegistry::new(NodeStore::new(), transports);
    let dispatcher = JobDispatcher::new(store.clone(), registry, ReconcilePolicy::default());

    let config = test_config();
    let state = AppState::new(config.clone(), dispatcher.clone());

    TestApp {
        router: build_app_router(state, &config),
        dispatcher,
        store,
        http,
        ssh,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, path: &str) -> Response {
    send(app, Method::GET, path, Body::empty(), None).await
}

pub async fn delete(app: &Router, path: &str) -> Response {
    send(app, Method::DELETE, path, Body::empty(), None).await
}

pub async fn post_empty(app: &Router, path: &str) -> Response {
    send(app, Method::POST, path, Body::empty(), None).await
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> Response {
    send_json(app, Method::POST, path, body).await
}

pub async fn put_json(app: &Router, path: &str, body: Value) -> Response {
    send_json(app, Method::PUT, path, body).await
}

async fn send_json(app: &Router, method: Method, path: &str, body: Value) -> Response {
    send(
        app,
        method,
        path,
        Body::from(body.to_string()),
        Some("application/json".to_string()),
    )
    .await
}

/// Send a multipart body with one part named `field`.
pub async fn post_multipart(
    app: &Router,
    path: &str,
    field: &str,
    file_name: &str,
    content_type: &str,
    content: &[u8],
) -> Response {
    let boundary = "vidfleet-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    send(
        app,
        Method::POST,
        path,
        Body::from(body),
        Some(format!("multipart/form-data; boundary={boundary}")),
    )
    .await
}

async fn send(
    app: &Router,
    method: Method,
    path: &str,
    body: Body,
    content_type: Option<String>,
) -> Response {
    let mut request = Request::builder().method(method).uri(path);
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    app.clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Expect `status` and return the `data` member of the body.
pub async fn expect_data(response: Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await["data"].clone()
}

// ---------------------------------------------------------------------------
// Domain helpers
// ---------------------------------------------------------------------------

pub async fn register_node(app: &Router, connection_type: &str) -> Value {
    let response = post_json(
        app,
        "/api/v1/nodes",
        serde_json::json!({
            "name": format!("{connection_type}-node"),
            "host": "gpu.local",
            "connectionType": connection_type,
            "user": "render",
            "password": "secret",
        }),
    )
    .await;
    expect_data(response, StatusCode::CREATED).await
}

pub fn manual_job(node_id: &str) -> Value {
    serde_json::json!({
        "inputMethod": "manual",
        "manualPath": "input_videos/a.mp4",
        "nodeId": node_id,
        "upscaleFlag": "true",
        "upscaleValue": "3",
    })
}

/// Poll the job over HTTP until `done` holds.
pub async fn wait_for(app: &Router, id: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let job = expect_data(get(app, &format!("/api/v1/jobs/{id}")).await, StatusCode::OK).await;
        if done(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached the expected state");
}

pub async fn wait_for_status(app: &Router, id: &str, status: &str) -> Value {
    wait_for(app, id, |job| job["status"] == status).await
}
