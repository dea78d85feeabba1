//! Worker node descriptors.
//!
//! A [`Node`] is the public view of a registered worker and is safe to
//! serialize across the system boundary. Login material lives in the
//! separate [`NodeCredentials`] type, which deliberately implements
//! neither `Serialize` nor a revealing `Debug`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::lenient;
use crate::types::{NodeId, Timestamp};

/// Port of the node-side job API when none is given.
pub const DEFAULT_HTTP_PORT: u16 = 9090;

/// SSH port when none is given.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Workspace directory holding the pipeline entry point on every node.
pub const DEFAULT_WORKSPACE: &str = "/workspace";

/// How the control plane talks to a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Http,
    Ssh,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Ssh => f.write_str("ssh"),
        }
    }
}

/// Last-known reachability of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    #[default]
    Offline,
}

impl NodeStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// Public descriptor of a registered worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub host: String,
    pub connection_type: ConnectionType,
    pub http_port: u16,
    pub ssh_port: u16,
    pub gpu_label: String,
    pub location: String,
    pub workspace_path: String,
    pub status: NodeStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Node {
    /// The port used by this node's transport.
    pub fn port(&self) -> u16 {
        match self.connection_type {
            ConnectionType::Http => self.http_port,
            ConnectionType::Ssh => self.ssh_port,
        }
    }

    /// `host:port` for log lines and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    /// Apply a partial update. Credentials are handled by the caller.
    pub fn apply_update(&mut self, update: &UpdateNode, now: Timestamp) -> Result<(), CoreError> {
        if let Some(host) = &update.host {
            let host = host.trim();
            if host.is_empty() {
                return Err(CoreError::Validation("Host must not be empty".into()));
            }
            self.host = host.to_string();
        }
        if let Some(name) = &update.name {
            self.name = name.trim().to_string();
        }
        if let Some(connection_type) = update.connection_type {
            self.connection_type = connection_type;
        }
        if let Some(port) = update.http_port {
            self.http_port = port;
        }
        if let Some(port) = update.ssh_port {
            self.ssh_port = port;
        }
        if let Some(gpu) = &update.gpu_label {
            self.gpu_label = gpu.clone();
        }
        if let Some(location) = &update.location {
            self.location = location.clone();
        }
        if let Some(workspace) = &update.workspace_path {
            let workspace = workspace.trim();
            self.workspace_path = if workspace.is_empty() {
                DEFAULT_WORKSPACE.to_string()
            } else {
                workspace.to_string()
            };
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Login material for SSH nodes. Empty for HTTP nodes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NodeCredentials {
    user: String,
    password: String,
}

impl NodeCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for NodeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Request body for `POST /api/v1/nodes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default, alias = "apiPort", deserialize_with = "lenient::port")]
    pub http_port: Option<u16>,
    #[serde(default, alias = "port", deserialize_with = "lenient::port")]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "gpu")]
    pub gpu_label: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

impl RegisterNode {
    /// Validate the registration and split it into the public descriptor
    /// (initially `offline`) and its credentials.
    pub fn into_node(
        self,
        id: NodeId,
        now: Timestamp,
    ) -> Result<(Node, NodeCredentials), CoreError> {
        let host = self.host.as_deref().map(str::trim).unwrap_or_default();
        if host.is_empty() {
            return Err(CoreError::Validation("Host is required".into()));
        }

        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => host.to_string(),
        };

        let workspace_path = match self.workspace_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => DEFAULT_WORKSPACE.to_string(),
        };

        let node = Node {
            id,
            name,
            host: host.to_string(),
            connection_type: self.connection_type.unwrap_or_default(),
            http_port: self.http_port.unwrap_or(DEFAULT_HTTP_PORT),
            ssh_port: self.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            gpu_label: self.gpu_label.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            workspace_path,
            status: NodeStatus::Offline,
            created_at: now,
            updated_at: now,
        };

        let credentials = NodeCredentials::new(
            self.user.unwrap_or_default(),
            self.password.unwrap_or_default(),
        );

        Ok((node, credentials))
    }
}

/// Request body for `PUT /api/v1/nodes/{id}`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default, alias = "apiPort", deserialize_with = "lenient::port")]
    pub http_port: Option<u16>,
    #[serde(default, alias = "port", deserialize_with = "lenient::port")]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "gpu")]
    pub gpu_label: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

impl UpdateNode {
    /// Replacement credentials, if the update carries any login fields.
    /// Missing halves are taken from `current`.
    pub fn credentials(&self, current: &NodeCredentials) -> Option<NodeCredentials> {
        if self.user.is_none() && self.password.is_none() {
            return None;
        }
        Some(NodeCredentials::new(
            self.user.clone().unwrap_or_else(|| current.user().to_string()),
            self.password
                .clone()
                .unwrap_or_else(|| current.password().to_string()),
        ))
    }
}
