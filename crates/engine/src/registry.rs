//! Node registration and reachability.
//!
//! Listing nodes refreshes the status of every HTTP node with a bounded
//! health check. Checks run concurrently in a [`JoinSet`]; each one has
//! its own timeout and the whole batch has a deadline, after which any
//! check still in flight is dropped and that node keeps its last-known
//! status. SSH nodes are never checked on list because a session
//! handshake is too slow for a listing.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use vidfleet_core::node::{ConnectionType, Node, NodeStatus, RegisterNode, UpdateNode};
use vidfleet_core::pipeline::SetupReport;
use vidfleet_core::types::new_id;
use vidfleet_store::{NodeStore, RegisteredNode};
use vidfleet_transport::{NodeTarget, TransportSet, HEALTH_TIMEOUT, SSH_CONNECT_TIMEOUT};

use crate::error::DispatchError;

/// Timeouts for the health checks issued while listing nodes.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckTimeouts {
    pub per_node: Duration,
    pub batch: Duration,
}

impl Default for HealthCheckTimeouts {
    fn default() -> Self {
        Self {
            per_node: Duration::from_secs(2),
            batch: Duration::from_secs(3),
        }
    }
}

/// Outcome of an explicit connectivity test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTestResult {
    pub status: NodeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
}

impl NodeTestResult {
    fn from_reachability(node: &Node, reachable: bool) -> Self {
        if reachable {
            return Self {
                status: NodeStatus::Online,
                message: "Connection successful".into(),
                troubleshooting: Vec::new(),
            };
        }

        let troubleshooting = match node.connection_type {
            ConnectionType::Http => vec![
                format!("Check that the node API is running on {}", node.address()),
                "Verify VPN is connected".into(),
                "Check firewall rules allow the API port".into(),
                "Confirm GET /health answers {\"status\": \"ok\"}".into(),
            ],
            ConnectionType::Ssh => vec![
                "Verify VPN is connected".into(),
                format!("Check SSH port (configured: {})", node.ssh_port),
                "Verify username and password are correct".into(),
                "Ensure SSH service is running on the node".into(),
                "Check firewall rules allow SSH connections".into(),
            ],
        };
        Self {
            status: NodeStatus::Offline,
            message: format!("Connection to {} failed", node.address()),
            troubleshooting,
        }
    }
}

/// Registered worker nodes and their transports.
#[derive(Clone)]
pub struct NodeRegistry {
    store: NodeStore,
    transports: TransportSet,
    health: HealthCheckTimeouts,
}

impl NodeRegistry {
    pub fn new(store: NodeStore, transports: TransportSet) -> Self {
        Self::with_health_timeouts(store, transports, HealthCheckTimeouts::default())
    }

    pub fn with_health_timeouts(
        store: NodeStore,
        transports: TransportSet,
        health: HealthCheckTimeouts,
    ) -> Self {
        Self {
            store,
            transports,
            health,
        }
    }

    pub fn transports(&self) -> &TransportSet {
        &self.transports
    }

    /// Register a node and check it once to set its initial status.
    pub async fn register(&self, request: RegisterNode) -> Result<Node, DispatchError> {
        let (mut node, credentials) = request.into_node(new_id(), chrono::Utc::now())?;
        let target = NodeTarget::new(node.clone(), credentials.clone());

        let reachable = self.is_reachable(&target, explicit_timeout(node.connection_type)).await;
        node.status = NodeStatus::from_reachable(reachable);

        tracing::info!(
            node_id = %node.id,
            name = %node.name,
            address = %node.address(),
            connection_type = %node.connection_type,
            status = ?node.status,
            "Node registered",
        );
        Ok(self.store.insert(node, credentials).await)
    }

    pub async fn get(&self, id: &str) -> Option<Node> {
        self.store.get(id).await
    }

    /// All nodes, with fresh status for HTTP nodes that answer in time.
    pub async fn list(&self) -> Vec<Node> {
        let entries = self.store.list_with_credentials().await;
        let deadline = Instant::now() + self.health.batch;
        let per_node = self.health.per_node;

        let mut in_flight = JoinSet::new();
        for RegisteredNode { node, credentials } in entries {
            if node.connection_type != ConnectionType::Http {
                continue;
            }
            let transport = self.transports.for_connection(node.connection_type);
            let target = NodeTarget::new(node, credentials);
            in_flight.spawn(async move {
                let reachable =
                    tokio::time::timeout(per_node, transport.test_connectivity(&target, per_node))
                        .await
                        .unwrap_or(false);
                (target.node.id, reachable)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(Ok((id, reachable)))) => {
                    self.store
                        .set_status(&id, NodeStatus::from_reachable(reachable))
                        .await;
                }
                Ok(Some(Err(e))) => tracing::warn!(error = %e, "Node health check task failed"),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = in_flight.len(),
                        "Node health check batch timed out; keeping last-known status",
                    );
                    break;
                }
            }
        }
        // Dropping the set aborts unfinished checks.
        drop(in_flight);

        self.store.list().await
    }

    /// Explicit connectivity test. The result is recorded as the node's
    /// status.
    pub async fn test(&self, id: &str) -> Result<NodeTestResult, DispatchError> {
        let target = self
            .target(id)
            .await
            .ok_or_else(|| DispatchError::NodeNotFound(id.to_string()))?;

        tracing::info!(
            node_id = %id,
            address = %target.node.address(),
            connection_type = %target.node.connection_type,
            "Testing node connection",
        );
        let reachable = self
            .is_reachable(&target, explicit_timeout(target.node.connection_type))
            .await;
        self.store
            .set_status(id, NodeStatus::from_reachable(reachable))
            .await;
        Ok(NodeTestResult::from_reachability(&target.node, reachable))
    }

    /// Check the node's workspace, pipeline files and interpreter.
    pub async fn verify(&self, id: &str) -> Result<SetupReport, DispatchError> {
        let target = self
            .target(id)
            .await
            .ok_or_else(|| DispatchError::NodeNotFound(id.to_string()))?;
        let address = target.node.address();

        self.transports
            .for_connection(target.node.connection_type)
            .verify_setup(&target)
            .await
            .map_err(|e| DispatchError::remote(e, address))
    }

    pub async fn update(&self, id: &str, update: &UpdateNode) -> Result<Node, DispatchError> {
        let node = self.store.update(id, update).await?;
        tracing::info!(node_id = %id, "Node updated");
        Ok(node)
    }

    pub async fn delete(&self, id: &str) -> Result<Node, DispatchError> {
        let node = self.store.delete(id).await?;
        tracing::info!(node_id = %id, name = %node.name, "Node deleted");
        Ok(node)
    }

    /// The node with its credentials, if registered.
    pub(crate) async fn target(&self, id: &str) -> Option<NodeTarget> {
        self.store
            .get_with_credentials(id)
            .await
            .map(|r| NodeTarget::new(r.node, r.credentials))
    }

    /// The node if it is registered and online. HTTP nodes are re-checked
    /// with the short list timeout; SSH nodes use their cached status.
    pub(crate) async fn available_target(&self, id: &str) -> Option<NodeTarget> {
        let mut target = self.target(id).await?;
        if target.node.connection_type == ConnectionType::Http {
            let per_node = self.health.per_node;
            let reachable = tokio::time::timeout(per_node, self.is_reachable(&target, per_node))
                .await
                .unwrap_or(false);
            if let Some(node) = self
                .store
                .set_status(id, NodeStatus::from_reachable(reachable))
                .await
            {
                target.node = node;
            }
        }
        target.node.status.is_online().then_some(target)
    }

    // ---- private helpers ----

    async fn is_reachable(&self, target: &NodeTarget, timeout: Duration) -> bool {
        self.transports
            .for_connection(target.node.connection_type)
            .test_connectivity(target, timeout)
            .await
    }
}

fn explicit_timeout(connection_type: ConnectionType) -> Duration {
    match connection_type {
        ConnectionType::Http => HEALTH_TIMEOUT,
        ConnectionType::Ssh => SSH_CONNECT_TIMEOUT,
    }
}
