//! Values exchanged between the engine and a transport.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use vidfleet_core::job::{InputSpec, Job, ProcessingOptions};
use vidfleet_core::node::{Node, NodeCredentials};
use vidfleet_core::output::OutputDescriptor;

use crate::error::TransportError;

/// A node together with the credentials needed to reach it.
#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub node: Node,
    pub credentials: NodeCredentials,
}

impl NodeTarget {
    pub fn new(node: Node, credentials: NodeCredentials) -> Self {
        Self { node, credentials }
    }

    /// Base URL of the node's job API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.node.host, self.node.http_port)
    }
}

/// What a node is asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub input: InputSpec,
    pub options: ProcessingOptions,
}

impl JobSpec {
    pub fn from_job(job: &Job) -> Self {
        Self {
            input: job.input.clone(),
            options: job.options,
        }
    }
}

/// Incremental output while a blocking submission runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitEvent {
    Progress(u8),
    Output(String),
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The node queued the job; poll it with this handle.
    Accepted { handle: String },
    /// The job ran to completion during submission.
    Finished { log: String },
}

/// Remote job state as reported by a node. Unrecognised strings map to
/// [`RemoteState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl RemoteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// `GET /jobs/{id}` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteJobStatus {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "unknown_state")]
    pub status: RemoteState,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Captured pipeline output.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub output_files: Option<Vec<OutputDescriptor>>,
}

fn unknown_state() -> RemoteState {
    RemoteState::Unknown
}

impl RemoteJobStatus {
    pub fn new(status: RemoteState) -> Self {
        Self {
            id: None,
            status,
            progress: None,
            error: None,
            output: None,
            output_files: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(f64::from(progress));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_output_files(mut self, files: Vec<OutputDescriptor>) -> Self {
        self.output_files = Some(files);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Reported progress as a whole percentage in `[0, 100]`.
    pub fn progress(&self) -> Option<u8> {
        self.progress
            .filter(|p| p.is_finite())
            .map(|p| p.round().clamp(0.0, 100.0) as u8)
    }
}

/// Entry of `GET /jobs`, used to recover lost handles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteJobSummary {
    pub id: String,
    #[serde(default = "unknown_state")]
    pub status: RemoteState,
    #[serde(default)]
    pub input_method: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub manual_path: Option<String>,
    #[serde(default)]
    pub created_at: Option<f64>,
}

impl RemoteJobSummary {
    pub fn matches(&self, input: &InputSpec) -> bool {
        input.matches(
            self.input_method.as_deref(),
            self.youtube_url.as_deref(),
            self.manual_path.as_deref(),
        )
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A streaming artifact download.
pub struct OutputStream {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// A file to forward to a node's upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// The node's answer to an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}
