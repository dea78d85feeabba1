//! Job records, status rules and the creation request.
//!
//! The job record is owned by the store; this module only knows how a
//! record may change. All mutation goes through [`Job::apply`] so the
//! status rules hold no matter which component issues the patch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::lenient;
use crate::output::OutputDescriptor;
use crate::types::{JobId, NodeId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `completed`, `failed` and `cancelled` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Self-loops are always allowed (the running-with-warning path).
    /// Terminal states are sinks and a running job never returns to
    /// pending.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        !(self == Self::Running && next == Self::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Input and options
// ---------------------------------------------------------------------------

/// Where the source video comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "inputMethod")]
pub enum InputSpec {
    /// Remote URL the node downloads itself.
    #[serde(rename = "youtube")]
    Url {
        #[serde(rename = "youtubeUrl")]
        url: String,
    },
    /// Path relative to the node's workspace.
    #[serde(rename = "manual")]
    Path {
        #[serde(rename = "manualPath")]
        path: String,
    },
}

impl InputSpec {
    /// The URL or path handed to the pipeline.
    pub fn value(&self) -> &str {
        match self {
            Self::Url { url } => url,
            Self::Path { path } => path,
        }
    }

    /// Wire name of the input method.
    pub fn method_str(&self) -> &'static str {
        match self {
            Self::Url { .. } => "youtube",
            Self::Path { .. } => "manual",
        }
    }

    /// Whether a remote job's reported input identifies this same input.
    pub fn matches(&self, method: Option<&str>, url: Option<&str>, path: Option<&str>) -> bool {
        if method.is_some_and(|m| m != self.method_str()) {
            return false;
        }
        match self {
            Self::Url { url: mine } => url == Some(mine.as_str()),
            Self::Path { path: mine } => path == Some(mine.as_str()),
        }
    }
}

/// The four pipeline toggles and the upscale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub unet_flag: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub face_restore_flag: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub upscale_flag: bool,
    #[serde(default = "lenient::default_scale", deserialize_with = "lenient::scale")]
    pub upscale_value: f64,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub clahe_flag: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            unet_flag: false,
            face_restore_flag: false,
            upscale_flag: false,
            upscale_value: lenient::DEFAULT_SCALE,
            clahe_flag: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Authoritative job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub input: InputSpec,
    pub node_id: NodeId,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(flatten)]
    pub options: ProcessingOptions,
    pub status: JobStatus,
    pub progress: u8,
    /// Identifier assigned by the node's job API.
    #[serde(rename = "remoteJobId", default)]
    pub remote_handle: Option<String>,
    /// Files reported by the node's listing endpoint.
    #[serde(default)]
    pub output_files: Vec<OutputDescriptor>,
    /// Path resolved from the execution log.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Canonical output used for download.
    #[serde(default)]
    pub output_locator: Option<String>,
    #[serde(rename = "output", default)]
    pub log_text: String,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn new(
        id: JobId,
        input: InputSpec,
        node_id: NodeId,
        node_name: Option<String>,
        options: ProcessingOptions,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            input,
            node_id,
            node_name,
            options,
            status: JobStatus::Pending,
            progress: 0,
            remote_handle: None,
            output_files: Vec::new(),
            output_path: None,
            output_locator: None,
            log_text: String::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update.
    ///
    /// Leaving a terminal state is a `Conflict` and nothing is applied.
    /// A non-terminal move the status rules forbid (running back to
    /// pending) is ignored while the remaining fields still apply. The
    /// remote handle is only written while unset.
    pub fn apply(&mut self, patch: JobPatch, now: Timestamp) -> Result<(), CoreError> {
        if let Some(next) = patch.status {
            if self.status.is_terminal() && next != self.status {
                return Err(CoreError::Conflict(format!(
                    "Job is already {} and cannot become {next}",
                    self.status
                )));
            }
            if self.status.can_transition_to(next) {
                self.status = next;
            }
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(handle) = patch.remote_handle {
            if self.remote_handle.is_none() {
                self.remote_handle = Some(handle);
            }
        }
        if let Some(files) = patch.output_files {
            self.output_files = files;
        }
        if let Some(path) = patch.output_path {
            self.output_path = Some(path);
        }
        if let Some(locator) = patch.output_locator {
            self.output_locator = Some(locator);
        }
        if let Some(log) = patch.log_text {
            self.log_text = log;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A partial job update. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub remote_handle: Option<String>,
    pub output_files: Option<Vec<OutputDescriptor>>,
    pub output_path: Option<String>,
    pub output_locator: Option<String>,
    pub log_text: Option<String>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn remote_handle(mut self, handle: impl Into<String>) -> Self {
        self.remote_handle = Some(handle.into());
        self
    }

    pub fn output_files(mut self, files: Vec<OutputDescriptor>) -> Self {
        self.output_files = Some(files);
        self
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn output_locator(mut self, locator: impl Into<String>) -> Self {
        self.output_locator = Some(locator.into());
        self
    }

    pub fn log_text(mut self, log: impl Into<String>) -> Self {
        self.log_text = Some(log.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }
}

// ---------------------------------------------------------------------------
// CreateJob
// ---------------------------------------------------------------------------

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJob {
    #[serde(default)]
    pub input_method: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub manual_path: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(flatten)]
    pub options: ProcessingOptions,
}

impl CreateJob {
    /// The target node id, required and non-blank.
    pub fn node_id(&self) -> Result<&str, CoreError> {
        match self.node_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(CoreError::Validation("Node is required".into())),
        }
    }

    /// Resolve the input method and its source value.
    pub fn input_spec(&self) -> Result<InputSpec, CoreError> {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match self.input_method.as_deref().map(str::trim) {
            Some("youtube") => non_blank(&self.youtube_url)
                .map(|url| InputSpec::Url { url })
                .ok_or_else(|| CoreError::Validation("YouTube URL is required".into())),
            Some("manual") => non_blank(&self.manual_path)
                .map(|path| InputSpec::Path { path })
                .ok_or_else(|| CoreError::Validation("Manual path is required".into())),
            Some(other) => Err(CoreError::Validation(format!(
                "Unknown input method '{other}' (expected youtube or manual)"
            ))),
            None => Err(CoreError::Validation("Input method is required".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn job() -> Job {
        Job::new(
            "j1".into(),
            InputSpec::Path {
                path: "input_videos/a.mp4".into(),
            },
            "n1".into(),
            None,
            ProcessingOptions::default(),
            Utc::now(),
        )
    }

    // -- JobStatus --

    #[test]
    fn terminal_states_are_sinks() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert_eq!(terminal.can_transition_to(next), next == terminal);
            }
        }
    }

    #[test]
    fn running_never_returns_to_pending() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
    }

    // -- Job::apply --

    #[test]
    fn apply_rejects_leaving_terminal_state() {
        let mut job = job();
        job.apply(JobPatch::default().status(JobStatus::Completed), Utc::now())
            .unwrap();
        let before = job.clone();

        let result = job.apply(
            JobPatch::default().status(JobStatus::Running).progress(10),
            Utc::now(),
        );
        assert_matches!(result, Err(CoreError::Conflict(_)));
        assert_eq!(job.status, before.status);
        assert_eq!(job.progress, before.progress);
    }

    #[test]
    fn apply_ignores_backward_move_but_keeps_other_fields() {
        let mut job = job();
        job.apply(JobPatch::default().status(JobStatus::Running), Utc::now())
            .unwrap();
        job.apply(
            JobPatch::default().status(JobStatus::Pending).progress(42),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 42);
    }

    #[test]
    fn remote_handle_set_once_and_progress_clamped() {
        let mut job = job();
        job.apply(JobPatch::default().remote_handle("r1").progress(250), Utc::now())
            .unwrap();
        job.apply(JobPatch::default().remote_handle("r2"), Utc::now())
            .unwrap();
        assert_eq!(job.remote_handle.as_deref(), Some("r1"));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn error_can_be_set_and_cleared() {
        let mut job = job();
        job.apply(JobPatch::default().error("boom"), Utc::now()).unwrap();
        assert_eq!(job.error.as_deref(), Some("boom"));
        job.apply(JobPatch::default().clear_error(), Utc::now()).unwrap();
        assert!(job.error.is_none());
    }

    // -- Serialization --

    #[test]
    fn job_serializes_flat_camel_case() {
        let json = serde_json::to_value(job()).unwrap();
        assert_eq!(json["inputMethod"], "manual");
        assert_eq!(json["manualPath"], "input_videos/a.mp4");
        assert_eq!(json["upscaleValue"], 2.0);
        assert_eq!(json["status"], "pending");
        assert!(json["remoteJobId"].is_null());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job_with_times(&back));
    }

    fn job_with_times(reference: &Job) -> Job {
        let mut j = job();
        j.created_at = reference.created_at;
        j.updated_at = reference.updated_at;
        j
    }

    // -- CreateJob --

    #[test]
    fn create_request_parses_lenient_fields() {
        let req: CreateJob = serde_json::from_value(serde_json::json!({
            "inputMethod": "youtube",
            "youtubeUrl": "https://youtu.be/x",
            "nodeId": "n1",
            "unetFlag": "true",
            "faceRestoreFlag": false,
            "upscaleValue": "not-a-number",
        }))
        .unwrap();

        assert!(req.options.unet_flag);
        assert!(!req.options.face_restore_flag);
        assert_eq!(req.options.upscale_value, 2.0);
        assert_eq!(req.node_id().unwrap(), "n1");
        assert_eq!(
            req.input_spec().unwrap(),
            InputSpec::Url {
                url: "https://youtu.be/x".into()
            }
        );
    }

    #[test]
    fn create_request_validation_errors() {
        let req: CreateJob =
            serde_json::from_value(serde_json::json!({"inputMethod": "manual"})).unwrap();
        assert_matches!(req.input_spec(), Err(CoreError::Validation(m)) if m.contains("Manual path"));
        assert_matches!(req.node_id(), Err(CoreError::Validation(_)));

        let req: CreateJob =
            serde_json::from_value(serde_json::json!({"inputMethod": "ftp"})).unwrap();
        assert_matches!(req.input_spec(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn input_matching_uses_method_and_value() {
        let input = InputSpec::Path {
            path: "input_videos/a.mp4".into(),
        };
        assert!(input.matches(Some("manual"), None, Some("input_videos/a.mp4")));
        assert!(input.matches(None, None, Some("input_videos/a.mp4")));
        assert!(!input.matches(Some("youtube"), None, Some("input_videos/a.mp4")));
        assert!(!input.matches(Some("manual"), None, Some("input_videos/b.mp4")));
    }
}
