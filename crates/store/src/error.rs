use vidfleet_core::error::CoreError;
use vidfleet_core::types::{JobId, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Persistence writer has stopped")]
    WriterStopped,
}
