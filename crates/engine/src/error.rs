use vidfleet_core::error::CoreError;
use vidfleet_core::job::JobStatus;
use vidfleet_core::types::{JobId, NodeId};
use vidfleet_store::StoreError;
use vidfleet_transport::TransportError;

/// Errors surfaced by registry and dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The target node is unknown or offline at creation time.
    #[error("Node not available")]
    NodeUnavailable(NodeId),

    #[error("Job cannot be cancelled (status: {0})")]
    NotCancellable(JobStatus),

    /// The job is in the wrong state for the requested operation.
    #[error("{0}")]
    InvalidState(String),

    #[error("No output files found for this job")]
    NoOutputs(JobId),

    #[error("Cannot connect to remote node {address}")]
    NodeUnreachable { address: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => Self::JobNotFound(id),
            StoreError::NodeNotFound(id) => Self::NodeNotFound(id),
            StoreError::Core(core) => Self::Core(core),
            other => Self::Store(other),
        }
    }
}

impl DispatchError {
    /// Wrap a transport failure, folding connection-level errors into
    /// [`DispatchError::NodeUnreachable`].
    pub(crate) fn remote(err: TransportError, address: String) -> Self {
        if err.is_unreachable() {
            tracing::warn!(address = %address, error = %err, "Remote node unreachable");
            Self::NodeUnreachable { address }
        } else {
            Self::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use vidfleet_core::node::ConnectionType;

    use super::*;

    #[test]
    fn store_not_found_maps_to_entity_variant() {
        let err = DispatchError::from(StoreError::JobNotFound("j1".into()));
        assert_matches!(err, DispatchError::JobNotFound(id) if id == "j1");

        let err = DispatchError::from(StoreError::Core(CoreError::Conflict("done".into())));
        assert_matches!(err, DispatchError::Core(CoreError::Conflict(_)));
    }

    #[test]
    fn timeouts_become_unreachable() {
        let err = DispatchError::remote(
            TransportError::Timeout(Duration::from_secs(1)),
            "gpu:9090".into(),
        );
        assert_matches!(err, DispatchError::NodeUnreachable { address } if address == "gpu:9090");

        let err = DispatchError::remote(
            TransportError::Unsupported {
                operation: "Downloading job outputs",
                transport: ConnectionType::Ssh,
            },
            "gpu:22".into(),
        );
        assert_matches!(err, DispatchError::Transport(TransportError::Unsupported { .. }));
    }
}
