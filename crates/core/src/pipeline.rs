//! Remote pipeline invocation and workspace layout.

use serde::{Deserialize, Serialize};

use crate::job::{InputSpec, ProcessingOptions};

/// Entry point script inside the node's workspace.
pub const ENTRY_POINT: &str = "pipeline_wrapper.py";

/// The pipeline the entry point wraps.
pub const PIPELINE_SCRIPT: &str = "pipeline.py";

/// Subdirectory of the workspace holding uploaded and manual inputs.
pub const INPUT_DIR: &str = "input_videos";

/// Build the shell command that runs the pipeline for one job.
///
/// Argument order is fixed: input, unet, face restore, upscale, upscale
/// value, clahe. Booleans are written as `true`/`false`.
pub fn build_pipeline_command(input: &InputSpec, options: &ProcessingOptions) -> String {
    format!(
        "python {ENTRY_POINT} {} {} {} {} {} {}",
        shell_quote(input.value()),
        options.unet_flag,
        options.face_restore_flag,
        options.upscale_flag,
        options.upscale_value,
        options.clahe_flag,
    )
}

/// Prefix `command` so it runs inside `workspace`.
pub fn in_workspace(workspace: &str, command: &str) -> String {
    format!("cd {} && {command}", shell_quote(workspace))
}

/// Single-quote `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// Setup verification
// ---------------------------------------------------------------------------

/// What a setup check looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Directory,
    File,
}

/// One filesystem expectation on a worker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupExpectation {
    pub name: &'static str,
    pub path: String,
    pub kind: CheckKind,
}

impl SetupExpectation {
    /// Shell test printing `exists` or `not found`.
    pub fn test_command(&self) -> String {
        let flag = match self.kind {
            CheckKind::Directory => "-d",
            CheckKind::File => "-f",
        };
        format!(
            "test {flag} {} && echo exists || echo 'not found'",
            shell_quote(&self.path)
        )
    }
}

/// The layout every worker node must provide under `workspace`.
pub fn setup_expectations(workspace: &str) -> Vec<SetupExpectation> {
    let base = workspace.trim_end_matches('/');
    vec![
        SetupExpectation {
            name: "Workspace directory",
            path: base.to_string(),
            kind: CheckKind::Directory,
        },
        SetupExpectation {
            name: "Input videos directory",
            path: format!("{base}/{INPUT_DIR}"),
            kind: CheckKind::Directory,
        },
        SetupExpectation {
            name: PIPELINE_SCRIPT,
            path: format!("{base}/{PIPELINE_SCRIPT}"),
            kind: CheckKind::File,
        },
        SetupExpectation {
            name: ENTRY_POINT,
            path: format!("{base}/{ENTRY_POINT}"),
            kind: CheckKind::File,
        },
    ]
}

/// Outcome of a single verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Missing,
    Error,
}

/// A verification check as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCheck {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Overall verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Ready,
    Incomplete,
}

/// Response of a node setup verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupReport {
    pub status: SetupStatus,
    pub checks: Vec<SetupCheck>,
    pub message: String,
}

impl SetupReport {
    /// Summarise `checks`: ready only when every check passed.
    pub fn from_checks(checks: Vec<SetupCheck>) -> Self {
        let failing: Vec<&str> = checks
            .iter()
            .filter(|c| c.status != CheckStatus::Ok)
            .map(|c| c.name.as_str())
            .collect();

        let (status, message) = if failing.is_empty() {
            (SetupStatus::Ready, "Node is ready to run jobs".to_string())
        } else {
            (
                SetupStatus::Incomplete,
                format!("Missing or failing: {}", failing.join(", ")),
            )
        };

        Self {
            status,
            checks,
            message,
        }
    }
}
