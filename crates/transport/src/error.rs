use std::time::Duration;

use vidfleet_core::node::ConnectionType;

/// Errors from talking to a worker node.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, timeout, body).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The node answered with a non-2xx status code.
    #[error("Node API error ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The node answered, but not in the expected shape.
    #[error("Unexpected response from node: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH authentication failed for user '{0}'")]
    AuthFailed(String),

    /// A precondition on the node is not met.
    #[error("{0}")]
    Setup(String),

    /// The remote command exited non-zero.
    #[error("Command failed with code {exit_code}: {output}")]
    CommandFailed { exit_code: u32, output: String },

    #[error("{operation} is not supported for {transport} nodes")]
    Unsupported {
        operation: &'static str,
        transport: ConnectionType,
    },
}

impl TransportError {
    /// Whether the node could not be reached at all, as opposed to
    /// answering with an error.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::Timeout(_) | Self::Ssh(_) => true,
            _ => false,
        }
    }
}
