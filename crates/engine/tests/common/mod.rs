//! Scriptable in-memory transport and engine fixtures.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use vidfleet_core::job::Job;
use vidfleet_core::node::{ConnectionType, Node, RegisterNode};
use vidfleet_core::output::OutputDescriptor;
use vidfleet_core::pipeline::{SetupCheck, SetupReport};
use vidfleet_engine::{JobDispatcher, NodeRegistry, HealthCheckTimeouts, ReconcilePolicy};
use vidfleet_store::job_store::DEFAULT_DEBOUNCE;
use vidfleet_store::{JobStore, MemoryPersistence, NodeStore};
use vidfleet_transport::{
    JobSpec, NodeTarget, OutputStream, RemoteJobStatus, RemoteJobSummary, SubmitEvent,
    Submission, Transport, TransportError, TransportSet, UploadFile, UploadReceipt,
};

/// What `submit` does.
#[derive(Clone)]
pub enum SubmitScript {
    Accept(String),
    Finish {
        events: Vec<SubmitEvent>,
        log: String,
    },
    Reject(String),
    Unreachable,
}

/// One scripted answer to `fetch_status`.
#[derive(Clone)]
pub enum Poll {
    Ok(RemoteJobStatus),
    Fail,
}

struct Script {
    reachable: bool,
    health_delay: Duration,
    submit: SubmitScript,
    polls: VecDeque<Poll>,
    /// Answer once `polls` is drained.
    fallback: Poll,
    outputs: Vec<OutputDescriptor>,
    remote_jobs: Vec<RemoteJobSummary>,
    download: &'static [u8],
}

pub struct FakeTransport {
    kind: ConnectionType,
    script: Mutex<Script>,
    health_checks: AtomicUsize,
    polls: AtomicUsize,
    submissions: Mutex<Vec<JobSpec>>,
}

impl FakeTransport {
    pub fn new(kind: ConnectionType) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(Script {
                reachable: true,
                health_delay: Duration::ZERO,
                submit: SubmitScript::Accept("remote-1".into()),
                polls: VecDeque::new(),
                fallback: Poll::Fail,
                outputs: Vec::new(),
                remote_jobs: Vec::new(),
                download: b"video-bytes",
            }),
            health_checks: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.script.lock().unwrap().reachable = reachable;
    }

    pub fn set_health_delay(&self, delay: Duration) {
        self.script.lock().unwrap().health_delay = delay;
    }

    pub fn set_submit(&self, submit: SubmitScript) {
        self.script.lock().unwrap().submit = submit;
    }

    pub fn push_polls(&self, polls: impl IntoIterator<Item = Poll>) {
        self.script.lock().unwrap().polls.extend(polls);
    }

    pub fn set_fallback(&self, poll: Poll) {
        self.script.lock().unwrap().fallback = poll;
    }

    pub fn set_outputs(&self, outputs: Vec<OutputDescriptor>) {
        self.script.lock().unwrap().outputs = outputs;
    }

    pub fn set_remote_jobs(&self, jobs: Vec<RemoteJobSummary>) {
        self.script.lock().unwrap().remote_jobs = jobs;
    }

    pub fn health_check_count(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<JobSpec> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> ConnectionType {
        self.kind
    }

    async fn test_connectivity(&self, _target: &NodeTarget, _timeout: Duration) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        let (reachable, delay) = {
            let script = self.script.lock().unwrap();
            (script.reachable, script.health_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reachable
    }

    async fn submit(
        &self,
        _target: &NodeTarget,
        spec: &JobSpec,
        events: mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError> {
        self.submissions.lock().unwrap().push(spec.clone());
        let submit = self.script.lock().unwrap().submit.clone();
        match submit {
            SubmitScript::Accept(handle) => Ok(Submission::Accepted { handle }),
            SubmitScript::Finish { events: scripted, log } => {
                for event in scripted {
                    let _ = events.send(event);
                }
                Ok(Submission::Finished { log })
            }
            SubmitScript::Reject(message) => Err(TransportError::Rejected {
                status: 500,
                body: message,
            }),
            SubmitScript::Unreachable => Err(TransportError::Timeout(Duration::from_secs(10))),
        }
    }

    async fn fetch_status(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            let fallback = script.fallback.clone();
            script.polls.pop_front().unwrap_or(fallback)
        };
        match next {
            Poll::Ok(status) => Ok(status),
            Poll::Fail => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn fetch_outputs(
        &self,
        _target: &NodeTarget,
        _handle: &str,
    ) -> Result<Vec<OutputDescriptor>, TransportError> {
        Ok(self.script.lock().unwrap().outputs.clone())
    }

    async fn stream_output(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        name: Option<&str>,
    ) -> Result<OutputStream, TransportError> {
        let known = {
            let script = self.script.lock().unwrap();
            name.map_or(true, |n| script.outputs.iter().any(|o| o.name == n))
                .then_some(script.download)
        };
        let Some(bytes) = known else {
            return Err(TransportError::Rejected {
                status: 404,
                body: "File not found".into(),
            });
        };
        let chunks: Vec<Result<Bytes, TransportError>> = vec![Ok(Bytes::from_static(bytes))];
        Ok(OutputStream {
            content_length: Some(bytes.len() as u64),
            stream: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn list_jobs(&self, _target: &NodeTarget) -> Result<Vec<RemoteJobSummary>, TransportError> {
        Ok(self.script.lock().unwrap().remote_jobs.clone())
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

/// Engine wired to one fake per connection type.
pub struct Harness {
    pub dispatcher: JobDispatcher,
    pub registry: NodeRegistry,
    pub store: JobStore,
    pub http: Arc<FakeTransport>,
    pub ssh: Arc<FakeTransport>,
}

pub async fn harness() -> Harness {
    harness_with(HealthCheckTimeouts::default()).await
}

pub async fn harness_with(health: HealthCheckTimeouts) -> Harness {
    let http = FakeTransport::new(ConnectionType::Http);
    let ssh = FakeTransport::new(ConnectionType::Ssh);
    let transports = TransportSet::new(http.clone(), ssh.clone());

    let store = JobStore::open(Arc::new(MemoryPersistence::new()), DEFAULT_DEBOUNCE)
        .await
        .expect("open store");
    let registry = NodeRegistry::with_health_timeouts(NodeStore::new(), transports, health);
    let dispatcher = JobDispatcher::new(store.clone(), registry.clone(), ReconcilePolicy::default());

    Harness {
        dispatcher,
        registry,
        store,
        http,
        ssh,
    }
}

pub async fn register(registry: &NodeRegistry, connection_type: &str) -> Node {
    let request: RegisterNode = serde_json::from_value(serde_json::json!({
        "name": format!("{connection_type}-node"),
        "host": "gpu.local",
        "connectionType": connection_type,
        "user": "render",
        "password": "secret",
    }))
    .unwrap();
    registry.register(request).await.unwrap()
}

pub fn manual_job(node_id: &str, path: &str) -> vidfleet_core::job::CreateJob {
    serde_json::from_value(serde_json::json!({
        "inputMethod": "manual",
        "manualPath": path,
        "nodeId": node_id,
        "upscaleFlag": true,
        "upscaleValue": 2.5,
    }))
    .unwrap()
}

/// Advance virtual time in one-second steps until `done` holds.
pub async fn wait_for(store: &JobStore, id: &str, done: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..600 {
        if let Some(job) = store.get(id).await {
            if done(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("job {id} never reached the expected state");
}
