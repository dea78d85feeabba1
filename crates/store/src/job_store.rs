//! The authoritative job map and its write-coalescing persistence queue.
//!
//! Reads and writes hit the in-memory map guarded by an async `RwLock`.
//! Every mutation then asks the background writer to persist the full
//! set: deferred requests are coalesced into a single save that runs once
//! the debounce window closes, while flush requests save immediately and
//! report the outcome to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use vidfleet_core::job::{Job, JobPatch};
use vidfleet_core::types::JobId;

use crate::error::StoreError;
use crate::persistence::JobPersistence;

/// Default window during which routine updates are coalesced.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

type JobMap = Arc<RwLock<HashMap<JobId, Job>>>;

enum WriteRequest {
    Deferred,
    Flush(oneshot::Sender<Result<(), StoreError>>),
}

/// Shared handle to the job set. Cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    jobs: JobMap,
    writes: mpsc::UnboundedSender<WriteRequest>,
}

impl JobStore {
    /// Load the persisted set and start the background writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(
        persistence: Arc<dyn JobPersistence>,
        debounce: Duration,
    ) -> Result<Self, StoreError> {
        let loaded = persistence.load().await?;
        tracing::info!(count = loaded.len(), "Loaded jobs from persistent storage");

        let jobs: JobMap = Arc::new(RwLock::new(
            loaded.into_iter().map(|job| (job.id.clone(), job)).collect(),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, Arc::clone(&jobs), persistence, debounce));

        Ok(Self { jobs, writes: tx })
    }

    /// Insert a new job and persist immediately.
    pub async fn create(&self, job: Job) -> Job {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        self.persist_now("create").await;
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Apply a partial update and schedule a deferred save.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
            job.apply(patch, chrono::Utc::now())?;
            job.clone()
        };
        self.schedule_save();
        Ok(updated)
    }

    /// Remove a job and persist immediately.
    pub async fn delete(&self, id: &str) -> Result<Job, StoreError> {
        let removed = self
            .jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
        self.persist_now("delete").await;
        Ok(removed)
    }

    /// Persist the current set now, bypassing the debounce window.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.writes
            .send(WriteRequest::Flush(tx))
            .map_err(|_| StoreError::WriterStopped)?;
        rx.await.map_err(|_| StoreError::WriterStopped)?
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    // ---- private helpers ----

    fn schedule_save(&self) {
        if self.writes.send(WriteRequest::Deferred).is_err() {
            tracing::warn!("Persistence writer has stopped; update kept in memory only");
        }
    }

    async fn persist_now(&self, operation: &'static str) {
        if let Err(e) = self.flush().await {
            tracing::warn!(operation, error = %e, "Failed to save jobs");
        }
    }
}

/// Background writer. Exits, after a final pending save, once every
/// store handle has been dropped.
async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    jobs: JobMap,
    persistence: Arc<dyn JobPersistence>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let request = match deadline {
            Some(at) => {
                tokio::select! {
                    request = rx.recv() => request,
                    _ = tokio::time::sleep_until(at) => {
                        deadline = None;
                        save(&jobs, persistence.as_ref()).await.ok();
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        match request {
            Some(WriteRequest::Deferred) => {
                // Coalesce into the already open window.
                deadline.get_or_insert_with(|| Instant::now() + debounce);
            }
            Some(WriteRequest::Flush(reply)) => {
                deadline = None;
                let result = save(&jobs, persistence.as_ref()).await;
                let _ = reply.send(result);
            }
            None => {
                if deadline.is_some() {
                    save(&jobs, persistence.as_ref()).await.ok();
                }
                tracing::debug!("Persistence writer stopped");
                return;
            }
        }
    }
}

async fn save(jobs: &JobMap, persistence: &dyn JobPersistence) -> Result<(), StoreError> {
    let snapshot: Vec<Job> = jobs.read().await.values().cloned().collect();
    match persistence.save_all(&snapshot).await {
        Ok(()) => {
            tracing::debug!(count = snapshot.len(), "Saved jobs to persistent storage");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Error saving jobs to persistent storage");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration as ChronoDuration, Utc};
    use vidfleet_core::error::CoreError;
    use vidfleet_core::job::{InputSpec, JobStatus, ProcessingOptions};

    use super::*;
    use crate::persistence::MemoryPersistence;

    fn job(id: &str, age_secs: i64) -> Job {
        Job::new(
            id.into(),
            InputSpec::Path {
                path: format!("input_videos/{id}.mp4"),
            },
            "n1".into(),
            None,
            ProcessingOptions::default(),
            Utc::now() - ChronoDuration::seconds(age_secs),
        )
    }

    async fn open(backend: &Arc<MemoryPersistence>) -> JobStore {
        JobStore::open(backend.clone(), DEFAULT_DEBOUNCE)
            .await
            .expect("open store")
    }

    // -- CRUD --

    #[tokio::test]
    async fn loads_existing_jobs() {
        let backend = Arc::new(MemoryPersistence::with_jobs(vec![job("a", 0)]));
        let store = open(&backend).await;
        assert!(store.get("a").await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;
        store.create(job("old", 60)).await;
        store.create(job("new", 0)).await;
        store.create(job("mid", 30)).await;

        let ids: Vec<String> = store.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;
        let result = store.update("nope", JobPatch::default().progress(5)).await;
        assert_matches!(result, Err(StoreError::JobNotFound(id)) if id == "nope");
    }

    #[tokio::test]
    async fn update_out_of_terminal_state_conflicts() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;
        store.create(job("a", 0)).await;
        store
            .update("a", JobPatch::default().status(JobStatus::Failed))
            .await
            .unwrap();

        let result = store
            .update("a", JobPatch::default().status(JobStatus::Running))
            .await;
        assert_matches!(result, Err(StoreError::Core(CoreError::Conflict(_))));
        assert_eq!(store.get("a").await.unwrap().status, JobStatus::Failed);
    }

    // -- Persistence timing --

    #[tokio::test(start_paused = true)]
    async fn create_and_delete_persist_immediately() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;

        store.create(job("a", 0)).await;
        assert_eq!(backend.save_count(), 1);
        assert_eq!(backend.snapshot().await.len(), 1);

        store.delete("a").await.unwrap();
        assert_eq!(backend.save_count(), 2);
        assert!(backend.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_coalesced_into_one_deferred_save() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;
        store.create(job("a", 0)).await;
        let baseline = backend.save_count();

        for p in [10, 20, 30] {
            store
                .update("a", JobPatch::default().progress(p))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(backend.save_count(), baseline);

        tokio::time::sleep(DEFAULT_DEBOUNCE).await;
        assert_eq!(backend.save_count(), baseline + 1);
        assert_eq!(backend.snapshot().await[0].progress, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_updates_now() {
        let backend = Arc::new(MemoryPersistence::new());
        let store = open(&backend).await;
        store.create(job("a", 0)).await;
        store
            .update("a", JobPatch::default().progress(77))
            .await
            .unwrap();

        store.flush().await.unwrap();
        assert_eq!(backend.snapshot().await[0].progress, 77);

        // The window was consumed by the flush.
        let after_flush = backend.save_count();
        tokio::time::sleep(DEFAULT_DEBOUNCE * 2).await;
        assert_eq!(backend.save_count(), after_flush);
    }
}
