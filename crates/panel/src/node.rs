//! Node identity and last-known state

use serde::{Deserialize, Serialize};
use std::fmt;
use trired_common::config::NodeConfig;

/// Stable node identifier, assigned at configuration time
pub type NodeId = u32;

/// Liveness of a node as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not polled successfully yet
    Unknown,
    Running,
    Stopped,
    /// Last poll failed (unreachable, timeout, bad payload)
    Error,
}

impl NodeStatus {
    /// Parse a status string reported by a node
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(NodeStatus::Unknown),
            "running" => Some(NodeStatus::Running),
            "stopped" => Some(NodeStatus::Stopped),
            "error" => Some(NodeStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Running => "running",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Error => "error",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured node and its last-known state
///
/// Fields are private so that the leader flag can only be set together with
/// a `running` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    id: NodeId,
    address: String,
    status: NodeStatus,
    is_leader: bool,
}

impl Node {
    /// Placeholder for a node that has not been polled yet
    pub fn placeholder(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            status: NodeStatus::Unknown,
            is_leader: false,
        }
    }

    /// Copy of this node with a newly observed state
    ///
    /// `is_leader` is dropped unless `status` is `running`.
    pub fn with_state(&self, status: NodeStatus, is_leader: bool) -> Self {
        Self {
            id: self.id,
            address: self.address.clone(),
            status,
            is_leader: is_leader && status == NodeStatus::Running,
        }
    }

    /// Copy of this node marked as failed
    pub fn errored(&self) -> Self {
        self.with_state(NodeStatus::Error, false)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }

    /// Base URL for this node's HTTP surface
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// Full URL for one of the node's endpoints
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

impl From<&NodeConfig> for Node {
    fn from(config: &NodeConfig) -> Self {
        Node::placeholder(config.id, config.address.clone())
    }
}
