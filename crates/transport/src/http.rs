//! REST client for the node-side job API.
//!
//! Wraps the worker's HTTP endpoints (health, job submission and status,
//! output listing and download, upload, setup status) using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vidfleet_core::job::InputSpec;
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::OutputDescriptor;
use vidfleet_core::pipeline::{
    CheckStatus, SetupCheck, SetupReport, ENTRY_POINT, PIPELINE_SCRIPT,
};

use crate::error::TransportError;
use crate::types::{
    JobSpec, NodeTarget, OutputStream, RemoteJobStatus, RemoteJobSummary, SubmitEvent,
    Submission, UploadFile, UploadReceipt,
};
use crate::{Transport, DOWNLOAD_TIMEOUT, REQUEST_TIMEOUT, UPLOAD_TIMEOUT};

/// HTTP transport shared by every HTTP node.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

/// `POST /jobs` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    input_method: &'static str,
    youtube_url: Option<&'a str>,
    manual_path: Option<&'a str>,
    unet_flag: bool,
    face_restore_flag: bool,
    upscale_flag: bool,
    upscale_value: f64,
    clahe_flag: bool,
}

impl<'a> SubmitBody<'a> {
    fn new(spec: &'a JobSpec) -> Self {
        let (youtube_url, manual_path) = match &spec.input {
            InputSpec::Url { url } => (Some(url.as_str()), None),
            InputSpec::Path { path } => (None, Some(path.as_str())),
        };
        Self {
            input_method: spec.input.method_str(),
            youtube_url,
            manual_path,
            unet_flag: spec.options.unet_flag,
            face_restore_flag: spec.options.face_restore_flag,
            upscale_flag: spec.options.upscale_flag,
            upscale_value: spec.options.upscale_value,
            clahe_flag: spec.options.clahe_flag,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputsBody {
    #[serde(default)]
    output_files: Vec<OutputDescriptor>,
}

#[derive(Debug, Deserialize)]
struct JobsBody {
    #[serde(default)]
    jobs: Vec<RemoteJobSummary>,
}

/// `GET /status` payload.
#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    workspace: PathReport,
    #[serde(default)]
    input_videos: PathReport,
    #[serde(default)]
    files: FileReport,
    #[serde(default)]
    python: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PathReport {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    exists: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileReport {
    #[serde(default)]
    pipeline_py: bool,
    #[serde(default)]
    pipeline_wrapper_py: bool,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    // ---- private helpers ----

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`TransportError::Rejected`]
    /// carrying the node's error message on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let raw = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: error_message(&raw),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// Prefer the `error` field of a JSON error body over the raw text.
fn error_message(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

fn check(name: &str, path: Option<String>, ok: bool) -> SetupCheck {
    SetupCheck {
        name: name.to_string(),
        path,
        status: if ok {
            CheckStatus::Ok
        } else {
            CheckStatus::Missing
        },
        version: None,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> ConnectionType {
        ConnectionType::Http
    }

    /// `GET /health` must answer 200 with `{"status": "ok"}`.
    async fn test_connectivity(&self, target: &NodeTarget, timeout: Duration) -> bool {
        let url = format!("{}/health", target.base_url());
        let response = match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(node_id = %target.node.id, url = %url, error = %e, "Health check failed");
                return false;
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(node_id = %target.node.id, url = %url, status = status.as_u16(), "Health check returned non-200");
            return false;
        }

        match response.json::<HealthBody>().await {
            Ok(HealthBody {
                status: Some(ref s),
            }) if s == "ok" => true,
            Ok(body) => {
                tracing::warn!(node_id = %target.node.id, url = %url, reported = ?body.status, "Health check reported unhealthy");
                false
            }
            Err(e) => {
                tracing::warn!(node_id = %target.node.id, url = %url, error = %e, "Health check body unreadable");
                false
            }
        }
    }

    async fn submit(
        &self,
        target: &NodeTarget,
        spec: &JobSpec,
        _events: mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError> {
        let response = self
            .client
            .post(format!("{}/jobs", target.base_url()))
            .timeout(REQUEST_TIMEOUT)
            .json(&SubmitBody::new(spec))
            .send()
            .await?;

        let created: CreatedJob = Self::parse_response(response).await?;
        tracing::info!(node_id = %target.node.id, handle = %created.id, "Job submitted to node API");
        Ok(Submission::Accepted { handle: created.id })
    }

    async fn fetch_status(
        &self,
        target: &NodeTarget,
        handle: &str,
        timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError> {
        self.get_json(format!("{}/jobs/{handle}", target.base_url()), timeout)
            .await
    }

    async fn fetch_outputs(
        &self,
        target: &NodeTarget,
        handle: &str,
    ) -> Result<Vec<OutputDescriptor>, TransportError> {
        let body: OutputsBody = self
            .get_json(
                format!("{}/jobs/{handle}/outputs", target.base_url()),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(body.output_files)
    }

    async fn stream_output(
        &self,
        target: &NodeTarget,
        handle: &str,
        name: Option<&str>,
    ) -> Result<OutputStream, TransportError> {
        let mut url = reqwest::Url::parse(&format!("{}/jobs/{handle}/download", target.base_url()))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if let Some(name) = name {
            url.path_segments_mut()
                .map_err(|_| TransportError::Protocol("Node URL cannot be a base".into()))?
                .push(name);
        }

        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        Ok(OutputStream {
            content_length: response.content_length(),
            stream: Box::pin(response.bytes_stream().map_err(TransportError::from)),
        })
    }

    async fn list_jobs(&self, target: &NodeTarget) -> Result<Vec<RemoteJobSummary>, TransportError> {
        let body: JobsBody = self
            .get_json(format!("{}/jobs", target.base_url()), REQUEST_TIMEOUT)
            .await?;
        Ok(body.jobs)
    }

    async fn verify_setup(&self, target: &NodeTarget) -> Result<SetupReport, TransportError> {
        let body: StatusBody = self
            .get_json(format!("{}/status", target.base_url()), REQUEST_TIMEOUT)
            .await?;

        let workspace = body
            .workspace
            .path
            .clone()
            .unwrap_or_else(|| target.node.workspace_path.clone());
        let base = workspace.trim_end_matches('/');

        let python = body.python.filter(|v| !v.is_empty() && v != "Unknown");
        let checks = vec![
            check("Workspace directory", Some(workspace.clone()), body.workspace.exists),
            check(
                "Input videos directory",
                body.input_videos.path,
                body.input_videos.exists,
            ),
            check(
                PIPELINE_SCRIPT,
                Some(format!("{base}/{PIPELINE_SCRIPT}")),
                body.files.pipeline_py,
            ),
            check(
                ENTRY_POINT,
                Some(format!("{base}/{ENTRY_POINT}")),
                body.files.pipeline_wrapper_py,
            ),
            SetupCheck {
                name: "Python".into(),
                path: None,
                status: if python.is_some() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Missing
                },
                version: python,
            },
        ];

        Ok(SetupReport::from_checks(checks))
    }

    async fn upload(
        &self,
        target: &NodeTarget,
        file: UploadFile,
    ) -> Result<UploadReceipt, TransportError> {
        let size = file.bytes.len();
        let part = reqwest::multipart::Part::stream(reqwest::Body::from(file.bytes))
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload", target.base_url()))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        let receipt: UploadReceipt = Self::parse_response(response).await?;
        tracing::info!(
            node_id = %target.node.id,
            file = %file.file_name,
            bytes = size,
            path = %receipt.path,
            "Upload forwarded to node",
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use vidfleet_core::job::ProcessingOptions;

    use super::*;

    #[test]
    fn submit_body_is_camel_case() {
        let spec = JobSpec {
            input: InputSpec::Path {
                path: "input_videos/a.mp4".into(),
            },
            options: ProcessingOptions {
                upscale_flag: true,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(SubmitBody::new(&spec)).unwrap();
        assert_eq!(json["inputMethod"], "manual");
        assert_eq!(json["manualPath"], "input_videos/a.mp4");
        assert!(json["youtubeUrl"].is_null());
        assert_eq!(json["upscaleFlag"], true);
        assert_eq!(json["upscaleValue"], 2.0);
    }

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(error_message(r#"{"error":"Job not found"}"#), "Job not found");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
