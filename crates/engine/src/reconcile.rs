//! Per-job reconciliation loop for HTTP-submitted jobs.
//!
//! The loop polls the node for the job's status and copies what it
//! learns into the job record. A failed poll never fails the job. Failed
//! polls back off exponentially; only once both the consecutive-failure
//! threshold and the silence threshold are crossed does the loop run one
//! disambiguating check, which either adopts a terminal remote state or
//! leaves the job `running` with an explanatory error and slows down.
//!
//! The loop re-reads the stored status on every iteration and exits as
//! soon as someone else made the job terminal (cancel) or removed it
//! (delete).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vidfleet_core::backoff::{Backoff, BackoffConfig};
use vidfleet_core::error::CoreError;
use vidfleet_core::job::{Job, JobPatch, JobStatus};
use vidfleet_core::output::{canonical_output, file_name, resolve_output_from_logs};
use vidfleet_store::{JobStore, StoreError};
use vidfleet_transport::{
    NodeTarget, RemoteJobStatus, RemoteState, Transport, TransportError, STATUS_TIMEOUT,
};

/// Error recorded when the attempt ceiling is reached.
pub const ATTEMPTS_EXHAUSTED_MESSAGE: &str =
    "Polling timeout - job may still be running on remote node";

/// Timing and threshold knobs of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilePolicy {
    /// Wait after a successful, non-terminal poll.
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Consecutive failures before the disambiguating check.
    pub failure_threshold: u32,
    /// Time since the last success before the disambiguating check.
    pub silence_threshold: Duration,
    pub final_check_timeout: Duration,
    /// Wait after the check found the job still running.
    pub still_running_delay: Duration,
    /// Wait after the check itself failed.
    pub unreachable_delay: Duration,
    pub max_attempts: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_timeout: STATUS_TIMEOUT,
            backoff: BackoffConfig::default(),
            failure_threshold: 10,
            silence_threshold: Duration::from_secs(5 * 60),
            final_check_timeout: Duration::from_secs(10),
            still_running_delay: Duration::from_secs(30),
            unreachable_delay: Duration::from_secs(60),
            max_attempts: 43_200,
        }
    }
}

/// Why a reconciliation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The node reported a terminal state, now stored locally.
    RemoteTerminal(JobStatus),
    /// The stored job became terminal from elsewhere.
    LocalTerminal(JobStatus),
    Removed,
    Cancelled,
    AttemptsExhausted,
}

/// Transient loop state. Never persisted; a restarted loop starts fresh.
#[derive(Debug)]
struct PollCursor {
    attempts: u64,
    consecutive_failures: u32,
    last_success: Instant,
    backoff: Backoff,
}

impl PollCursor {
    fn new(policy: &ReconcilePolicy) -> Self {
        Self {
            attempts: 0,
            consecutive_failures: 0,
            last_success: Instant::now(),
            backoff: Backoff::new(policy.backoff),
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = Instant::now();
        self.backoff.reset();
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    fn threshold_crossed(&self, policy: &ReconcilePolicy) -> bool {
        self.consecutive_failures >= policy.failure_threshold
            && self.last_success.elapsed() > policy.silence_threshold
    }
}

/// Result of the disambiguating check.
enum Verdict {
    StillRunning,
    Terminal(RemoteJobStatus),
    Unreachable(TransportError),
}

/// Everything one job's loop needs.
#[derive(Clone)]
pub(crate) struct Reconciler {
    pub(crate) store: JobStore,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) target: NodeTarget,
    pub(crate) policy: ReconcilePolicy,
}

impl Reconciler {
    /// Poll `handle` until the job settles, is stopped, or the attempt
    /// ceiling is reached.
    pub(crate) async fn run(&self, job_id: &str, handle: &str, cancel: CancellationToken) -> LoopExit {
        let policy = &self.policy;
        let mut cursor = PollCursor::new(policy);
        tracing::info!(job_id = %job_id, handle = %handle, node_id = %self.target.node.id, "Reconciliation started");

        while cursor.attempts < policy.max_attempts {
            match self.store.get(job_id).await {
                None => return LoopExit::Removed,
                Some(job) if job.status.is_terminal() => {
                    tracing::debug!(job_id = %job_id, status = %job.status, "Job settled locally; stopping reconciliation");
                    return LoopExit::LocalTerminal(job.status);
                }
                Some(_) => {}
            }
            cursor.attempts += 1;

            let delay = match self.poll(handle, policy.poll_timeout).await {
                Ok(remote) => {
                    cursor.record_success();
                    let terminal = remote.status.is_terminal();
                    if let Err(exit) = self.settle(job_id, handle, &remote).await {
                        return exit;
                    }
                    if terminal {
                        let status = local_status(remote.status).unwrap_or(JobStatus::Failed);
                        tracing::info!(job_id = %job_id, status = %status, "Remote job settled");
                        return LoopExit::RemoteTerminal(status);
                    }
                    policy.poll_interval
                }
                Err(e) => {
                    cursor.record_failure();
                    tracing::warn!(
                        job_id = %job_id,
                        handle = %handle,
                        attempt = cursor.attempts,
                        consecutive_failures = cursor.consecutive_failures,
                        error = %e,
                        "Status poll failed",
                    );

                    if cursor.threshold_crossed(policy) {
                        match self.disambiguate(handle).await {
                            Verdict::StillRunning => {
                                self.annotate(
                                    job_id,
                                    format!("Connection issues - job may still be running. Last poll error: {e}"),
                                )
                                .await;
                                cursor.consecutive_failures = 0;
                                policy.still_running_delay
                            }
                            Verdict::Terminal(remote) => {
                                if let Err(exit) = self.settle(job_id, handle, &remote).await {
                                    return exit;
                                }
                                let status = local_status(remote.status).unwrap_or(JobStatus::Failed);
                                return LoopExit::RemoteTerminal(status);
                            }
                            Verdict::Unreachable(check_err) => {
                                tracing::warn!(job_id = %job_id, error = %check_err, "Final status check failed");
                                self.annotate(
                                    job_id,
                                    format!(
                                        "Connection lost to remote node. Job may still be running. \
                                         Last error: {check_err}. Use refresh to check status."
                                    ),
                                )
                                .await;
                                policy.unreachable_delay
                            }
                        }
                    } else {
                        cursor.backoff.next()
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Reconciliation cancelled");
                    return LoopExit::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::warn!(job_id = %job_id, attempts = cursor.attempts, "Polling attempts exhausted");
        self.annotate(job_id, ATTEMPTS_EXHAUSTED_MESSAGE.to_string())
            .await;
        LoopExit::AttemptsExhausted
    }

    /// One status fetch bounded by `timeout`, whatever the transport does.
    pub(crate) async fn poll(
        &self,
        handle: &str,
        timeout: Duration,
    ) -> Result<RemoteJobStatus, TransportError> {
        tokio::time::timeout(timeout, self.transport.fetch_status(&self.target, handle, timeout))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    /// Copy a remote status into the job. Fetches the final listing when
    /// the remote job completed. A job that already reached a terminal
    /// state is returned untouched.
    pub(crate) async fn apply_remote(
        &self,
        job_id: &str,
        handle: &str,
        remote: &RemoteJobStatus,
    ) -> Result<Job, StoreError> {
        let current = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let mut patch = JobPatch::default();
        if let Some(status) = local_status(remote.status) {
            patch = patch.status(status);
        }
        if let Some(progress) = remote.progress() {
            patch = patch.progress(progress);
        }
        patch.error = Some(remote.error.clone());
        if remote.status == RemoteState::Failed && remote.error.is_none() {
            patch = patch.error("Remote job failed");
        }

        let log = remote.output.as_deref().unwrap_or(&current.log_text);
        if let Some(output) = &remote.output {
            patch = patch.log_text(output.clone());
        }
        let log_path = resolve_output_from_logs(log);
        if let Some(path) = &log_path {
            patch = patch.output_path(path.clone());
        }

        if remote.status == RemoteState::Completed {
            let mut files = remote.output_files.clone().unwrap_or_default();
            match self.transport.fetch_outputs(&self.target, handle).await {
                Ok(listed) if !listed.is_empty() => files = listed,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, handle = %handle, error = %e, "Failed to fetch output listing")
                }
            }

            let locator = canonical_output(&files, None)
                .map(|f| f.name.clone())
                .or_else(|| log_path.as_deref().map(|p| file_name(p).to_string()));
            if let Some(locator) = locator {
                patch = patch.output_locator(locator);
            }
            if !files.is_empty() {
                patch = patch.output_files(files);
            }
        }

        self.store.update(job_id, patch).await
    }

    // ---- private helpers ----

    async fn settle(
        &self,
        job_id: &str,
        handle: &str,
        remote: &RemoteJobStatus,
    ) -> Result<Job, LoopExit> {
        match self.apply_remote(job_id, handle, remote).await {
            Ok(job) if job.status.is_terminal() && !remote.status.is_terminal() => {
                Err(LoopExit::LocalTerminal(job.status))
            }
            Ok(job) => Ok(job),
            Err(StoreError::JobNotFound(_)) => Err(LoopExit::Removed),
            Err(StoreError::Core(CoreError::Conflict(_))) => {
                let status = self
                    .store
                    .get(job_id)
                    .await
                    .map(|j| j.status)
                    .unwrap_or(JobStatus::Cancelled);
                Err(LoopExit::LocalTerminal(status))
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record remote status");
                Err(LoopExit::LocalTerminal(JobStatus::Failed))
            }
        }
    }

    async fn disambiguate(&self, handle: &str) -> Verdict {
        match self.poll(handle, self.policy.final_check_timeout).await {
            Ok(remote) if remote.status.is_terminal() => Verdict::Terminal(remote),
            Ok(_) => Verdict::StillRunning,
            Err(e) => Verdict::Unreachable(e),
        }
    }

    /// Attach an informational error without touching the status.
    async fn annotate(&self, job_id: &str, message: String) {
        if let Err(e) = self
            .store
            .update(job_id, JobPatch::default().error(message))
            .await
        {
            tracing::debug!(job_id = %job_id, error = %e, "Could not annotate job");
        }
    }
}

/// Local status for a remote one. `Unknown` never changes local status.
pub(crate) fn local_status(remote: RemoteState) -> Option<JobStatus> {
    match remote {
        RemoteState::Pending => Some(JobStatus::Pending),
        RemoteState::Running => Some(JobStatus::Running),
        RemoteState::Completed => Some(JobStatus::Completed),
        RemoteState::Failed => Some(JobStatus::Failed),
        RemoteState::Cancelled => Some(JobStatus::Cancelled),
        RemoteState::Unknown => None,
    }
}
