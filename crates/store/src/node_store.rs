//! In-memory node registry storage.
//!
//! Credentials are stored beside each descriptor but only ever leave this
//! module through [`NodeStore::get_with_credentials`] and
//! [`NodeStore::list_with_credentials`]; everything else returns the
//! public [`Node`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use vidfleet_core::node::{Node, NodeCredentials, NodeStatus, UpdateNode};
use vidfleet_core::types::NodeId;

use crate::error::StoreError;

/// A node descriptor together with its login material.
#[derive(Debug, Clone)]
pub struct RegisteredNode {
    pub node: Node,
    pub credentials: NodeCredentials,
}

#[derive(Clone, Default)]
pub struct NodeStore {
    nodes: Arc<RwLock<HashMap<NodeId, RegisteredNode>>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, node: Node, credentials: NodeCredentials) -> Node {
        let public = node.clone();
        self.nodes
            .write()
            .await
            .insert(node.id.clone(), RegisteredNode { node, credentials });
        public
    }

    pub async fn get(&self, id: &str) -> Option<Node> {
        self.nodes.read().await.get(id).map(|r| r.node.clone())
    }

    pub async fn get_with_credentials(&self, id: &str) -> Option<RegisteredNode> {
        self.nodes.read().await.get(id).cloned()
    }

    /// All nodes in registration order.
    pub async fn list(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .map(|r| r.node.clone())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        nodes
    }

    /// All entries in registration order, credentials included.
    pub async fn list_with_credentials(&self) -> Vec<RegisteredNode> {
        let mut nodes: Vec<RegisteredNode> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.node.created_at.cmp(&b.node.created_at));
        nodes
    }

    /// Apply a partial update, replacing credentials when the update
    /// carries login fields.
    pub async fn update(&self, id: &str, update: &UpdateNode) -> Result<Node, StoreError> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;

        entry.node.apply_update(update, chrono::Utc::now())?;
        if let Some(credentials) = update.credentials(&entry.credentials) {
            entry.credentials = credentials;
        }
        Ok(entry.node.clone())
    }

    /// Record a health check result. Returns `None` if the node was removed
    /// meanwhile.
    pub async fn set_status(&self, id: &str, status: NodeStatus) -> Option<Node> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(id)?;
        if entry.node.status != status {
            tracing::info!(
                node_id = %id,
                from = ?entry.node.status,
                to = ?status,
                "Node status changed",
            );
            entry.node.status = status;
        }
        Some(entry.node.clone())
    }

    pub async fn delete(&self, id: &str) -> Result<Node, StoreError> {
        self.nodes
            .write()
            .await
            .remove(id)
            .map(|r| r.node)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))
    }
}
