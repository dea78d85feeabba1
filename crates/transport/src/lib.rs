//! Transports to worker nodes.
//!
//! A [`Transport`] is one way of executing and observing work on a node.
//! [`HttpTransport`] talks to the node-side job API and returns a handle
//! the engine polls; [`SshTransport`] runs the pipeline over an SSH
//! session and blocks until the command exits. The engine only sees the
//! trait and picks an implementation through [`TransportSet`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::OutputDescriptor;
use vidfleet_core::pipeline::SetupReport;

pub mod error;
pub mod http;
pub mod ssh;
pub mod types;

pub use error::TransportError;
pub use http::HttpTransport;
pub use ssh::SshTransport;
pub use types::{
    ByteStream, JobSpec, NodeTarget, OutputStream, RemoteJobStatus, RemoteJobSummary,
    RemoteState, SubmitEvent, Submission, UploadFile, UploadReceipt,
};

/// Liveness check timeout for explicit connectivity tests.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single status poll.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for ordinary node API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for forwarding an upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for streaming an artifact download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Timeout for establishing and authenticating an SSH session.
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Execute-and-observe capability for one connection type.
///
/// Operations a transport cannot perform return
/// [`TransportError::Unsupported`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> ConnectionType;

    /// Whether the node is reachable and healthy within `timeout`.
    async fn test_connectivity(&self, target: &NodeTarget, timeout: Duration) -> bool;

    /// Start the job on the node. Incremental output, if the transport
    /// produces any, is sent on `events`.
    async fn submit(
        &self,
        target: &NodeTarget,
        spec: &JobSpec,
        events: mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError>;

    async fn fetch_status(
        &self,
        target: &NodeTarget,
        handle: &str,
        timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError>;

    async fn fetch_outputs(
        &self,
        target: &NodeTarget,
        handle: &str,
    ) -> Result<Vec<OutputDescriptor>, TransportError>;

    /// Stream one artifact. `None` asks the node for its canonical output.
    async fn stream_output(
        &self,
        target: &NodeTarget,
        handle: &str,
        name: Option<&str>,
    ) -> Result<OutputStream, TransportError>;

    async fn list_jobs(&self, _target: &NodeTarget) -> Result<Vec<RemoteJobSummary>, TransportError> {
        Err(self.unsupported("Listing remote jobs"))
    }

    async fn verify_setup(&self, target: &NodeTarget) -> Result<SetupReport, TransportError>;

    async fn upload(
        &self,
        _target: &NodeTarget,
        _file: UploadFile,
    ) -> Result<UploadReceipt, TransportError> {
        Err(self.unsupported("File upload"))
    }

    fn unsupported(&self, operation: &'static str) -> TransportError {
        TransportError::Unsupported {
            operation,
            transport: self.kind(),
        }
    }
}

/// One transport per connection type.
#[derive(Clone)]
pub struct TransportSet {
    http: Arc<dyn Transport>,
    ssh: Arc<dyn Transport>,
}

impl TransportSet {
    pub fn new(http: Arc<dyn Transport>, ssh: Arc<dyn Transport>) -> Self {
        Self { http, ssh }
    }

    /// The production pair: reqwest for HTTP nodes, russh for SSH nodes.
    pub fn remote() -> Self {
        Self::new(Arc::new(HttpTransport::new()), Arc::new(SshTransport::new()))
    }

    pub fn for_connection(&self, connection_type: ConnectionType) -> Arc<dyn Transport> {
        match connection_type {
            ConnectionType::Http => Arc::clone(&self.http),
            ConnectionType::Ssh => Arc::clone(&self.ssh),
        }
    }
}
