//! Supervision of per-job background tasks.
//!
//! Each job has at most one task (execution followed by its
//! reconciliation loop). Tasks get a child of a master
//! [`CancellationToken`] so a single job can be stopped on cancel or
//! delete, and all of them together on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vidfleet_core::types::JobId;

/// How long a stopped task gets to exit before it is abandoned.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct ManagedTask {
    handle: JoinHandle<()>,
    /// Child of the master token.
    cancel: CancellationToken,
}

/// Registry of running per-job tasks.
pub struct ReconcilerSet {
    tasks: RwLock<HashMap<JobId, ManagedTask>>,
    cancel: CancellationToken,
}

impl Default for ReconcilerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilerSet {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the task for `job_id`, replacing any previous one.
    ///
    /// Returns `false` without spawning once shutdown has begun.
    pub async fn spawn<F, Fut>(&self, job_id: &str, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            tracing::warn!(job_id = %job_id, "Refusing to start task during shutdown");
            return false;
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(task(cancel.clone()));

        let mut tasks = self.tasks.write().await;
        tasks.retain(|_, t| !t.handle.is_finished());
        if let Some(previous) = tasks.insert(job_id.to_string(), ManagedTask { handle, cancel }) {
            previous.cancel.cancel();
        }
        true
    }

    /// Whether `job_id` has a task that has not finished yet.
    pub async fn is_active(&self, job_id: &str) -> bool {
        self.tasks
            .read()
            .await
            .get(job_id)
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub async fn active_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Cancel the task for `job_id` and wait briefly for it to exit.
    pub async fn stop(&self, job_id: &str) -> bool {
        let Some(managed) = self.tasks.write().await.remove(job_id) else {
            return false;
        };
        managed.cancel.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, managed.handle).await.is_err() {
            tracing::warn!(job_id = %job_id, "Task did not stop in time");
        }
        true
    }

    /// Cancel every task, then wait up to 5 seconds per task.
    pub async fn shutdown(&self) {
        tracing::info!("Stopping job tasks");
        self.cancel.cancel();

        let mut tasks = self.tasks.write().await;
        for (job_id, managed) in tasks.drain() {
            managed.cancel.cancel();
            if tokio::time::timeout(STOP_TIMEOUT, managed.handle).await.is_err() {
                tracing::warn!(job_id = %job_id, "Task did not stop in time");
            }
        }
        tracing::info!("Job tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    async fn wait_for_cancel(token: CancellationToken, flag: Arc<AtomicBool>) {
        token.cancelled().await;
        flag.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn stop_cancels_only_that_job() {
        let set = ReconcilerSet::new();
        let a = Arc::new(AtomicBool::new(false));
        let b = Arc::new(AtomicBool::new(false));

        let flag = a.clone();
        set.spawn("a", move |t| wait_for_cancel(t, flag)).await;
        let flag = b.clone();
        set.spawn("b", move |t| wait_for_cancel(t, flag)).await;

        assert!(set.stop("a").await);
        assert!(a.load(Ordering::SeqCst));
        assert!(!b.load(Ordering::SeqCst));
        assert!(set.is_active("b").await);
        assert!(!set.stop("a").await);
    }

    #[tokio::test]
    async fn respawn_cancels_previous_task() {
        let set = ReconcilerSet::new();
        let first = Arc::new(AtomicBool::new(false));

        let flag = first.clone();
        set.spawn("a", move |t| wait_for_cancel(t, flag)).await;
        set.spawn("a", |t| async move { t.cancelled().await }).await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while !first.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(set.active_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_refuses_new_tasks() {
        let set = ReconcilerSet::new();
        for id in ["a", "b", "c"] {
            set.spawn(id, |t| async move { t.cancelled().await }).await;
        }
        assert_eq!(set.active_count().await, 3);

        set.shutdown().await;
        assert_eq!(set.active_count().await, 0);
        assert!(!set.spawn("d", |_| async {}).await);
    }

    #[tokio::test]
    async fn finished_tasks_are_not_active() {
        let set = ReconcilerSet::new();
        set.spawn("done", |_| async {}).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while set.is_active("done").await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(set.active_count().await, 0);
    }
}
