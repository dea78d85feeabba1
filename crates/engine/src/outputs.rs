//! Output listing, artifact download and input upload.

use serde::Serialize;
use vidfleet_core::error::CoreError;
use vidfleet_core::job::{Job, JobStatus};
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::{canonical_output, content_type_for, OutputDescriptor};
use vidfleet_transport::{ByteStream, TransportError, UploadFile, UploadReceipt};

use crate::dispatcher::JobDispatcher;
use crate::error::DispatchError;

/// Video MIME types accepted for upload.
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "video/mp4",
    "video/avi",
    "video/quicktime",
    "video/x-msvideo",
    "video/webm",
];

/// Outputs known for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutputs {
    pub job_id: String,
    pub output_files: Vec<OutputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub count: usize,
}

impl JobOutputs {
    fn stored(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            output_files: job.output_files.clone(),
            output_path: job.output_path.clone(),
            count: job.output_files.len(),
        }
    }
}

/// An artifact ready to be streamed to the client.
pub struct JobDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for JobDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDownload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    /// Completed jobs on HTTP nodes list from the node; everything else,
    /// and any listing failure, falls back to what the record holds.
    pub async fn outputs(&self, id: &str) -> Result<JobOutputs, DispatchError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Ok(JobOutputs::stored(&job));
        }
        let Some(target) = self.registry.target(&job.node_id).await else {
            return Ok(JobOutputs::stored(&job));
        };
        if target.node.connection_type != ConnectionType::Http {
            return Ok(JobOutputs::stored(&job));
        }

        let handle = job.remote_handle.as_deref().unwrap_or(&job.id);
        let transport = self
            .registry
            .transports()
            .for_connection(target.node.connection_type);
        match transport.fetch_outputs(&target, handle).await {
            Ok(files) => Ok(JobOutputs {
                job_id: job.id.clone(),
                count: files.len(),
                output_files: files,
                output_path: job.output_path.clone(),
            }),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Output listing failed; using stored outputs");
                Ok(JobOutputs::stored(&job))
            }
        }
    }

    /// Open a stream for the named output, or the canonical one.
    pub async fn download(
        &self,
        id: &str,
        name: Option<&str>,
    ) -> Result<JobDownload, DispatchError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Err(DispatchError::InvalidState("Job not completed".into()));
        }
        let target = self
            .registry
            .target(&job.node_id)
            .await
            .ok_or_else(|| DispatchError::NodeNotFound(job.node_id.clone()))?;
        if target.node.connection_type != ConnectionType::Http {
            return Err(DispatchError::Transport(TransportError::Unsupported {
                operation: "Downloading job outputs",
                transport: target.node.connection_type,
            }));
        }

        let address = target.node.address();
        let transport = self
            .registry
            .transports()
            .for_connection(target.node.connection_type);
        let handle = job.remote_handle.as_deref().unwrap_or(&job.id);

        let mut files = transport
            .fetch_outputs(&target, handle)
            .await
            .map_err(|e| DispatchError::remote(e, address.clone()))?;
        if files.is_empty() {
            files = job.output_files.clone();
        }
        if files.is_empty() {
            return Err(DispatchError::NoOutputs(job.id.clone()));
        }

        let chosen = match canonical_output(&files, name) {
            Some(file) => file.clone(),
            None => match name {
                // Not listed; let the node decide.
                Some(name) => OutputDescriptor::named(name),
                None => return Err(DispatchError::NoOutputs(job.id.clone())),
            },
        };

        let output = transport
            .stream_output(&target, handle, Some(&chosen.name))
            .await
            .map_err(|e| DispatchError::remote(e, address))?;

        tracing::info!(job_id = %id, file = %chosen.name, "Streaming job output");
        Ok(JobDownload {
            content_type: content_type_for(&chosen.name),
            content_length: chosen.size.or(output.content_length),
            file_name: chosen.name,
            stream: output.stream,
        })
    }

    /// Forward an input video to an HTTP node's upload endpoint.
    pub async fn upload_input(
        &self,
        node_id: &str,
        file: UploadFile,
    ) -> Result<UploadReceipt, DispatchError> {
        if !ALLOWED_UPLOAD_TYPES.contains(&file.content_type.as_str()) {
            return Err(CoreError::Validation(format!(
                "Invalid file type '{}'. Only video files are allowed",
                file.content_type
            ))
            .into());
        }

        let target = self
            .registry
            .target(node_id)
            .await
            .ok_or_else(|| DispatchError::NodeNotFound(node_id.to_string()))?;
        if target.node.connection_type != ConnectionType::Http {
            return Err(DispatchError::Transport(TransportError::Unsupported {
                operation: "File upload",
                transport: target.node.connection_type,
            }));
        }

        tracing::info!(node_id = %node_id, file = %file.file_name, bytes = file.bytes.len(), "Forwarding upload");
        let address = target.node.address();
        self.registry
            .transports()
            .for_connection(target.node.connection_type)
            .upload(&target, file)
            .await
            .map_err(|e| DispatchError::remote(e, address))
    }
}
