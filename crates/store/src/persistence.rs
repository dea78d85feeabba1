//! Durable backends for the job set.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use vidfleet_core::job::Job;

use crate::error::StoreError;

/// Whole-set durability for job records.
#[async_trait]
pub trait JobPersistence: Send + Sync + 'static {
    /// Read every stored job. A store that has never been written is empty.
    async fn load(&self) -> Result<Vec<Job>, StoreError>;

    /// Replace the stored set with `jobs`.
    async fn save_all(&self, jobs: &[Job]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Pretty-printed JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Vec<Job>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No jobs file found, starting fresh");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(jobs)?;

        // Replace atomically via a sibling temp file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Keeps the last saved set in memory and counts saves.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Vec<Job>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend as if `jobs` had been saved earlier.
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            saved: Mutex::new(jobs),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save_all` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The most recently saved set.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl JobPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
        *self.saved.lock().await = jobs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
