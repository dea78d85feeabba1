//! Job dispatch: creation, execution, cancel, delete and manual refresh.
//!
//! Creating a job stores it as `pending` and spawns one supervised task
//! per job. The task marks the job `running` and submits it through the
//! node's transport. An HTTP submission returns a handle and the same
//! task continues into the reconciliation loop; an SSH submission blocks
//! until the pipeline exits and finalizes the job directly. A failed
//! submission is always terminal.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vidfleet_core::job::{CreateJob, Job, JobPatch, JobStatus};
use vidfleet_core::node::ConnectionType;
use vidfleet_core::output::{file_name, resolve_output_from_logs};
use vidfleet_core::types::new_id;
use vidfleet_store::JobStore;
use vidfleet_transport::{
    JobSpec, NodeTarget, SubmitEvent, Submission, TransportError, HEALTH_TIMEOUT,
};

use crate::error::DispatchError;
use crate::reconcile::{ReconcilePolicy, Reconciler};
use crate::registry::NodeRegistry;
use crate::supervision::ReconcilerSet;

/// Minimum spacing between log writes while an SSH job streams output.
const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a manual refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub job: Job,
    pub message: String,
}

/// Creates jobs and drives them on their nodes.
#[derive(Clone)]
pub struct JobDispatcher {
    pub(crate) store: JobStore,
    pub(crate) registry: NodeRegistry,
    reconcilers: Arc<ReconcilerSet>,
    policy: ReconcilePolicy,
}

impl JobDispatcher {
    pub fn new(store: JobStore, registry: NodeRegistry, policy: ReconcilePolicy) -> Self {
        Self {
            store,
            registry,
            reconcilers: Arc::new(ReconcilerSet::new()),
            policy,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn reconcilers(&self) -> &ReconcilerSet {
        &self.reconcilers
    }

    /// Validate and store a new job, then start it in the background.
    ///
    /// Fails without creating a record when the request is invalid or
    /// the node is not registered and online.
    pub async fn create(&self, request: CreateJob) -> Result<Job, DispatchError> {
        let node_id = request.node_id()?.to_string();
        let input = request.input_spec()?;

        let target = self
            .registry
            .available_target(&node_id)
            .await
            .ok_or_else(|| DispatchError::NodeUnavailable(node_id.clone()))?;

        let job = Job::new(
            new_id(),
            input,
            node_id,
            Some(target.node.name.clone()),
            request.options,
            chrono::Utc::now(),
        );
        let job = self.store.create(job).await;
        tracing::info!(
            job_id = %job.id,
            node_id = %job.node_id,
            input_method = job.input.method_str(),
            "Job created",
        );

        let dispatcher = self.clone();
        let job_id = job.id.clone();
        self.reconcilers
            .spawn(&job.id, move |cancel| async move {
                dispatcher.execute(job_id, target, cancel).await;
            })
            .await;

        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Job, DispatchError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| DispatchError::JobNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Job> {
        self.store.list().await
    }

    /// Mark a non-terminal job cancelled and stop its local task. The
    /// remote process is not signalled.
    pub async fn cancel(&self, id: &str) -> Result<Job, DispatchError> {
        let job = self.get(id).await?;
        if job.status.is_terminal() {
            return Err(DispatchError::NotCancellable(job.status));
        }

        let job = self
            .store
            .update(
                id,
                JobPatch::default().status(JobStatus::Cancelled).progress(0),
            )
            .await?;
        self.reconcilers.stop(id).await;
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    /// Remove the record regardless of status. No remote cleanup.
    pub async fn delete(&self, id: &str) -> Result<Job, DispatchError> {
        let removed = self.store.delete(id).await?;
        self.reconcilers.stop(id).await;
        tracing::info!(job_id = %id, status = %removed.status, "Job deleted");
        Ok(removed)
    }

    /// One synchronous poll-and-reconcile cycle.
    ///
    /// A job without a remote handle is first matched against the
    /// node's job list by input; a match adopts that handle. If the job
    /// is still active afterwards and no task is watching it, a
    /// reconciliation loop is started. Jobs still being submitted are left
    /// to their executing task.
    pub async fn refresh(&self, id: &str) -> Result<RefreshOutcome, DispatchError> {
        let job = self.get(id).await?;
        let Some(target) = self.registry.target(&job.node_id).await else {
            return Err(DispatchError::NodeNotFound(job.node_id));
        };
        if target.node.connection_type == ConnectionType::Ssh {
            return Err(DispatchError::Transport(TransportError::Unsupported {
                operation: "Refreshing job status",
                transport: ConnectionType::Ssh,
            }));
        }

        let transport = self.registry.transports().for_connection(target.node.connection_type);
        let address = target.node.address();
        if !transport.test_connectivity(&target, HEALTH_TIMEOUT).await {
            return Err(DispatchError::NodeUnreachable { address });
        }

        let (handle, recovered) = match job.remote_handle.clone() {
            Some(handle) => (handle, false),
            None if job.status == JobStatus::Pending || self.reconcilers.is_active(id).await => {
                return Ok(RefreshOutcome {
                    job,
                    message: "Job is still being submitted to the remote node".into(),
                });
            }
            None => {
                let remote_jobs = transport
                    .list_jobs(&target)
                    .await
                    .map_err(|e| DispatchError::remote(e, address.clone()))?;
                let Some(found) = remote_jobs.into_iter().find(|r| r.matches(&job.input)) else {
                    return Ok(RefreshOutcome {
                        job,
                        message: "No matching job found on the remote node".into(),
                    });
                };
                tracing::info!(job_id = %id, handle = %found.id, "Recovered remote handle by input match");
                self.store
                    .update(id, JobPatch::default().remote_handle(found.id.clone()))
                    .await?;
                (found.id, true)
            }
        };

        let reconciler = self.reconciler(target, transport);
        let remote = reconciler
            .poll(&handle, self.policy.poll_timeout)
            .await
            .map_err(|e| DispatchError::remote(e, address))?;
        let job = reconciler.apply_remote(id, &handle, &remote).await?;

        if !job.status.is_terminal() && !self.reconcilers.is_active(id).await {
            let job_id = id.to_string();
            let handle = handle.clone();
            self.reconcilers
                .spawn(id, move |cancel| async move {
                    reconciler.run(&job_id, &handle, cancel).await;
                })
                .await;
        }

        let message = if recovered {
            "Job recovered and refreshed successfully"
        } else {
            "Job status refreshed successfully"
        };
        Ok(RefreshOutcome {
            job,
            message: message.into(),
        })
    }

    /// Stop every background task. Records are left as they are.
    pub async fn shutdown(&self) {
        self.reconcilers.shutdown().await;
    }

    // ---- private helpers ----

    fn reconciler(
        &self,
        target: NodeTarget,
        transport: Arc<dyn vidfleet_transport::Transport>,
    ) -> Reconciler {
        Reconciler {
            store: self.store.clone(),
            transport,
            target,
            policy: self.policy,
        }
    }

    /// Background body of a job: submit, then finalize or reconcile.
    async fn execute(&self, job_id: String, target: NodeTarget, cancel: CancellationToken) {
        let job = match self
            .store
            .update(
                &job_id,
                JobPatch::default().status(JobStatus::Running).progress(0),
            )
            .await
        {
            Ok(job) if job.status == JobStatus::Running => job,
            Ok(job) => {
                tracing::debug!(job_id = %job_id, status = %job.status, "Job no longer startable");
                return;
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Job no longer startable");
                return;
            }
        };

        let transport = self
            .registry
            .transports()
            .for_connection(target.node.connection_type);
        let address = target.node.address();
        tracing::info!(
            job_id = %job_id,
            node_id = %target.node.id,
            address = %address,
            connection_type = %target.node.connection_type,
            "Executing job",
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let events = tokio::spawn(record_events(self.store.clone(), job_id.clone(), rx));

        let spec = JobSpec::from_job(&job);
        let submitted = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job_id, "Execution stopped before submission finished");
                events.abort();
                return;
            }
            result = transport.submit(&target, &spec, tx) => result,
        };
        let streamed_log = events.await.unwrap_or_default();

        match submitted {
            Ok(Submission::Accepted { handle }) => {
                let recorded = match self
                    .store
                    .update(&job_id, JobPatch::default().remote_handle(handle.clone()))
                    .await
                {
                    Ok(job) => job.remote_handle,
                    Err(e) => {
                        tracing::debug!(job_id = %job_id, error = %e, "Job gone before handle was recorded");
                        return;
                    }
                };
                if recorded.as_deref() != Some(handle.as_str()) {
                    tracing::error!(
                        job_id = %job_id,
                        handle = %handle,
                        recorded = ?recorded,
                        "Job already bound to another remote handle",
                    );
                    let message = format!(
                        "Remote job {handle} was accepted but the job is bound to {}",
                        recorded.as_deref().unwrap_or("no handle"),
                    );
                    let patch = JobPatch::default().status(JobStatus::Failed).error(message);
                    self.finish(&job_id, patch).await;
                    return;
                }
                tracing::info!(job_id = %job_id, handle = %handle, "Remote job accepted");
                let exit = self
                    .reconciler(target, transport)
                    .run(&job_id, &handle, cancel)
                    .await;
                tracing::debug!(job_id = %job_id, exit = ?exit, "Reconciliation ended");
            }
            Ok(Submission::Finished { log }) => {
                let log = if log.is_empty() { streamed_log } else { log };
                let mut patch = JobPatch::default()
                    .status(JobStatus::Completed)
                    .progress(100)
                    .clear_error();
                if let Some(path) = resolve_output_from_logs(&log) {
                    patch = patch
                        .output_locator(file_name(&path).to_string())
                        .output_path(path);
                }
                patch = patch.log_text(log);
                self.finish(&job_id, patch).await;
            }
            Err(e) => {
                let message = if e.is_unreachable() {
                    format!("Cannot connect to remote node {address}: {e}")
                } else {
                    e.to_string()
                };
                tracing::error!(job_id = %job_id, error = %e, "Job submission failed");
                let mut patch = JobPatch::default().status(JobStatus::Failed).error(message);
                if !streamed_log.is_empty() {
                    patch = patch.log_text(streamed_log);
                }
                self.finish(&job_id, patch).await;
            }
        }
    }

    async fn finish(&self, job_id: &str, patch: JobPatch) {
        match self.store.update(job_id, patch).await {
            Ok(job) => tracing::info!(job_id = %job_id, status = %job.status, "Job finished"),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Could not record job result"),
        }
    }
}

/// Apply streamed progress and output to the job until the sender is
/// dropped. Returns the full captured output.
async fn record_events(
    store: JobStore,
    job_id: String,
    mut rx: mpsc::UnboundedReceiver<SubmitEvent>,
) -> String {
    let mut log = String::new();
    let mut last_flush = Instant::now();
    let mut dirty = false;

    while let Some(event) = rx.recv().await {
        let patch = match event {
            SubmitEvent::Progress(progress) => JobPatch::default().progress(progress),
            SubmitEvent::Output(chunk) => {
                log.push_str(&chunk);
                dirty = true;
                if last_flush.elapsed() < LOG_FLUSH_INTERVAL {
                    continue;
                }
                JobPatch::default()
            }
        };
        let patch = if dirty {
            last_flush = Instant::now();
            dirty = false;
            patch.log_text(log.clone())
        } else {
            patch
        };
        if let Err(e) = store.update(&job_id, patch).await {
            tracing::debug!(job_id = %job_id, error = %e, "Dropping streamed update");
        }
    }
    log
}
