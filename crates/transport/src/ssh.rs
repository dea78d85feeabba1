//! SSH command-execution transport.
//!
//! Each operation opens a fresh password-authenticated session with
//! [`russh`], runs one or more commands and disconnects. Submission runs
//! the pipeline in the node's workspace and blocks until it exits,
//! forwarding output and progress markers as they arrive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::mpsc;
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::OutputDescriptor;
use vidfleet_core::pipeline::{
    build_pipeline_command, in_workspace, setup_expectations, shell_quote, CheckStatus,
    SetupCheck, SetupReport,
};
use vidfleet_core::progress::parse_progress;

use crate::error::TransportError;
use crate::types::{
    JobSpec, NodeTarget, OutputStream, RemoteJobStatus, SubmitEvent, Submission,
};
use crate::{Transport, SSH_CONNECT_TIMEOUT};

/// Characters of output kept in a command failure message.
const FAILURE_TAIL_CHARS: usize = 2000;

/// SSH transport shared by every SSH node.
#[derive(Clone)]
pub struct SshTransport {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts any host key; nodes are addressed by operator-entered hosts.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Collected result of one remote command.
#[derive(Debug, Default)]
struct ExecOutput {
    exit_code: Option<u32>,
    stdout: String,
    stderr: String,
}

impl ExecOutput {
    fn failure_text(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail(text.trim(), FAILURE_TAIL_CHARS).to_string()
    }
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// An authenticated session to one node.
struct Session {
    handle: Handle<AcceptingHandler>,
}

impl Session {
    async fn exec(
        &self,
        command: &str,
        events: Option<&mpsc::UnboundedSender<SubmitEvent>>,
    ) -> Result<ExecOutput, TransportError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut out = ExecOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    let chunk = String::from_utf8_lossy(data);
                    if let Some(tx) = events {
                        let _ = tx.send(SubmitEvent::Output(chunk.to_string()));
                        if let Some(progress) = parse_progress(&chunk) {
                            let _ = tx.send(SubmitEvent::Progress(progress));
                        }
                    }
                    out.stdout.push_str(&chunk);
                }
                ChannelMsg::ExtendedData { ref data, .. } => {
                    let chunk = String::from_utf8_lossy(data);
                    if let Some(tx) = events {
                        let _ = tx.send(SubmitEvent::Output(chunk.to_string()));
                    }
                    out.stderr.push_str(&chunk);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    out.exit_code = Some(exit_status);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Run `command` and return its trimmed stdout.
    async fn capture(&self, command: &str) -> Result<String, TransportError> {
        Ok(self.exec(command, None).await?.stdout.trim().to_string())
    }

    async fn close(self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }

    async fn connect(
        &self,
        target: &NodeTarget,
        timeout: Duration,
    ) -> Result<Session, TransportError> {
        let node = &target.node;
        let user = target.credentials.user();
        tracing::debug!(node_id = %node.id, user, address = %node.address(), "Opening SSH session");

        let connect = async {
            let mut handle = client::connect(
                Arc::clone(&self.config),
                (node.host.as_str(), node.ssh_port),
                AcceptingHandler,
            )
            .await?;
            let authenticated = handle
                .authenticate_password(user, target.credentials.password())
                .await?;
            if !authenticated {
                return Err(TransportError::AuthFailed(user.to_string()));
            }
            Ok(Session { handle })
        };

        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    /// Connect, look for the workspace and disconnect.
    ///
    /// A missing workspace is logged but still counts as reachable.
    async fn check_session(
        &self,
        target: &NodeTarget,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let session = self.connect(target, timeout).await?;

        match Self::workspace_exists(&session, &target.node.workspace_path).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                node_id = %target.node.id,
                workspace = %target.node.workspace_path,
                "Workspace directory not found",
            ),
            Err(e) => tracing::warn!(node_id = %target.node.id, error = %e, "Workspace check failed"),
        }

        session.close().await;
        Ok(())
    }

    async fn workspace_exists(session: &Session, workspace: &str) -> Result<bool, TransportError> {
        let answer = session
            .capture(&format!(
                "test -d {} && echo exists || echo 'not found'",
                shell_quote(workspace)
            ))
            .await?;
        Ok(answer == "exists")
    }

    async fn run_pipeline(
        &self,
        session: &Session,
        target: &NodeTarget,
        spec: &JobSpec,
        events: &mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError> {
        let workspace = &target.node.workspace_path;
        if !Self::workspace_exists(session, workspace).await? {
            return Err(TransportError::Setup(format!(
                "Workspace directory {workspace} not found on node"
            )));
        }

        let command = build_pipeline_command(&spec.input, &spec.options);
        tracing::info!(node_id = %target.node.id, command = %command, "Executing pipeline over SSH");

        let out = session
            .exec(&in_workspace(workspace, &command), Some(events))
            .await?;

        match out.exit_code {
            Some(0) => Ok(Submission::Finished { log: out.stdout }),
            Some(exit_code) => Err(TransportError::CommandFailed {
                exit_code,
                output: out.failure_text(),
            }),
            None => Err(TransportError::Protocol(
                "Command ended without an exit status".into(),
            )),
        }
    }

    async fn run_checks(
        session: &Session,
        target: &NodeTarget,
    ) -> Result<Vec<SetupCheck>, TransportError> {
        let mut checks = Vec::new();
        for expectation in setup_expectations(&target.node.workspace_path) {
            let answer = session.capture(&expectation.test_command()).await?;
            checks.push(SetupCheck {
                name: expectation.name.to_string(),
                path: Some(expectation.path),
                status: if answer == "exists" {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Missing
                },
                version: None,
            });
        }

        let python = session.exec("python --version 2>&1", None).await?;
        let version = python.stdout.trim().to_string();
        checks.push(SetupCheck {
            name: "Python".into(),
            path: None,
            status: if python.exit_code == Some(0) && !version.is_empty() {
                CheckStatus::Ok
            } else {
                CheckStatus::Error
            },
            version: (!version.is_empty()).then_some(version),
        });
        Ok(checks)
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn kind(&self) -> ConnectionType {
        ConnectionType::Ssh
    }

    async fn test_connectivity(&self, target: &NodeTarget, timeout: Duration) -> bool {
        within_deadline(&target.node.id, timeout, self.check_session(target, timeout)).await
    }

    async fn submit(
        &self,
        target: &NodeTarget,
        spec: &JobSpec,
        events: mpsc::UnboundedSender<SubmitEvent>,
    ) -> Result<Submission, TransportError> {
        let session = self.connect(target, self.connect_timeout).await?;
        let result = self.run_pipeline(&session, target, spec, &events).await;
        session.close().await;
        if let Err(e) = &result {
            tracing::error!(node_id = %target.node.id, error = %e, "SSH pipeline execution failed");
        }
        result
    }

    async fn fetch_status(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        _timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError> {
        Err(self.unsupported("Polling job status"))
    }

    async fn fetch_outputs(
        &self,
        _target: &NodeTarget,
        _handle: &str,
    ) -> Result<Vec<OutputDescriptor>, TransportError> {
        Err(self.unsupported("Listing job outputs"))
    }

    async fn stream_output(
        &self,
        _target: &NodeTarget,
        _handle: &str,
        _name: Option<&str>,
    ) -> Result<OutputStream, TransportError> {
        Err(self.unsupported("Downloading job outputs"))
    }

    async fn verify_setup(&self, target: &NodeTarget) -> Result<SetupReport, TransportError> {
        let session = self.connect(target, self.connect_timeout).await?;
        let checks = Self::run_checks(&session, target).await;
        session.close().await;
        Ok(SetupReport::from_checks(checks?))
    }
}

/// Run a whole connectivity check under one deadline.
async fn within_deadline(
    node_id: &str,
    timeout: Duration,
    check: impl std::future::Future<Output = Result<(), TransportError>>,
) -> bool {
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(node_id = %node_id, error = %e, "SSH connection test failed");
            false
        }
        Err(_) => {
            tracing::warn!(node_id = %node_id, timeout = ?timeout, "SSH connection test timed out");
            false
        }
    }
}
