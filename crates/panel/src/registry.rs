//! Node registry
//!
//! The registry is the single owner of the panel's view of the fleet. It is
//! only ever changed by publishing a complete snapshot produced by one poll
//! cycle, so readers see either the previous cycle or the next one, never a
//! mix of both.

use crate::node::{Node, NodeId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use trired_common::config::NodeConfig;
use trired_common::error::{Result, TriRedError};
use trired_common::METRICS;

/// Complete, immutable view of every configured node at one point in time
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Poll cycle that produced this snapshot (0 = startup placeholders)
    generation: u64,

    /// Nodes in configuration order
    nodes: Arc<[Node]>,
}

impl RegistrySnapshot {
    fn new(generation: u64, nodes: Vec<Node>) -> Self {
        Self {
            generation,
            nodes: nodes.into(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// The node currently believed to be leader
    ///
    /// If more than one node claims leadership the first in configuration
    /// order wins.
    pub fn leader(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.is_leader())
    }

    /// Number of nodes claiming leadership
    pub fn leader_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leader()).count()
    }

    /// Number of nodes reporting `running`
    pub fn running_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_running()).count()
    }
}

/// Single-writer registry of configured nodes
pub struct NodeRegistry {
    /// Configured ids, in order; membership never changes
    ids: Vec<NodeId>,

    /// Last cycle number handed out
    cycles: AtomicU64,

    /// Published snapshot
    snapshot: watch::Sender<RegistrySnapshot>,
}

impl NodeRegistry {
    /// Create a registry with every node in `unknown` state
    pub fn new(nodes: &[NodeConfig]) -> Result<Self> {
        if nodes.is_empty() {
            return Err(TriRedError::config("Registry needs at least one node"));
        }

        let mut seen = HashSet::new();
        for node in nodes {
            if !seen.insert(node.id) {
                return Err(TriRedError::config(format!("Duplicate node id: {}", node.id)));
            }
        }

        let placeholders: Vec<Node> = nodes.iter().map(Node::from).collect();
        let ids = placeholders.iter().map(Node::id).collect();
        let (snapshot, _) = watch::channel(RegistrySnapshot::new(0, placeholders));

        Ok(Self {
            ids,
            cycles: AtomicU64::new(0),
            snapshot,
        })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.snapshot.subscribe()
    }

    /// Configured node ids, in order
    pub fn node_ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// Reserve the number for a new poll cycle
    pub(crate) fn begin_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the whole snapshot with the result of `cycle`
    ///
    /// Returns `Ok(false)` when a newer cycle has already been published and
    /// this result was dropped. The node list must match the configured
    /// membership exactly.
    pub(crate) fn publish(&self, cycle: u64, nodes: Vec<Node>) -> Result<bool> {
        let same_membership = nodes.len() == self.ids.len()
            && nodes.iter().zip(&self.ids).all(|(node, id)| node.id() == *id);
        if !same_membership {
            return Err(TriRedError::internal(format!(
                "Snapshot for cycle {} does not match configured nodes",
                cycle
            )));
        }

        let next = RegistrySnapshot::new(cycle, nodes);
        let running = next.running_count();
        let leaders = next.leader_count();

        let published = self.snapshot.send_if_modified(|current| {
            if cycle <= current.generation {
                return false;
            }
            *current = next;
            true
        });

        if !published {
            debug!("Dropped stale snapshot from cycle {}", cycle);
            return Ok(false);
        }

        if leaders > 1 {
            warn!(
                "{} nodes claim leadership in cycle {}; routing to the first configured",
                leaders, cycle
            );
        }

        METRICS.poller.nodes_running.set(running as i64);
        METRICS.poller.leader_present.set(i64::from(leaders > 0));
        debug!(
            "Published snapshot {}: {} running, {} leader(s)",
            cycle, running, leaders
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;

    fn configs() -> Vec<NodeConfig> {
        vec![
            NodeConfig::new(1, "localhost:50051"),
            NodeConfig::new(2, "localhost:50052"),
            NodeConfig::new(3, "localhost:50053"),
        ]
    }

    fn with_states(registry: &NodeRegistry, states: &[(NodeStatus, bool)]) -> Vec<Node> {
        registry
            .snapshot()
            .iter()
            .zip(states)
            .map(|(node, (status, leader))| node.with_state(*status, *leader))
            .collect()
    }

    #[test]
    fn test_starts_with_placeholders() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let snapshot = registry.snapshot();

        assert_eq!(snapshot.generation(), 0);
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|n| n.status() == NodeStatus::Unknown));
        assert!(snapshot.leader().is_none());
        assert_eq!(registry.node_ids(), &[1, 2, 3]);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut nodes = configs();
        nodes.push(NodeConfig::new(1, "localhost:60000"));

        assert!(NodeRegistry::new(&nodes).is_err());
        assert!(NodeRegistry::new(&[]).is_err());
    }

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let before = registry.snapshot();

        let cycle = registry.begin_cycle();
        let nodes = with_states(
            &registry,
            &[
                (NodeStatus::Running, false),
                (NodeStatus::Running, true),
                (NodeStatus::Stopped, false),
            ],
        );
        assert!(registry.publish(cycle, nodes).unwrap());

        let after = registry.snapshot();
        assert_eq!(after.generation(), cycle);
        assert_eq!(after.leader().map(Node::id), Some(2));
        assert_eq!(after.running_count(), 2);

        // A previously taken snapshot is untouched
        assert!(before.iter().all(|n| n.status() == NodeStatus::Unknown));
    }

    #[test]
    fn test_stale_cycle_dropped() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let older = registry.begin_cycle();
        let newer = registry.begin_cycle();

        let running = with_states(&registry, &[(NodeStatus::Running, true); 3]);
        let stopped = with_states(&registry, &[(NodeStatus::Stopped, false); 3]);

        assert!(registry.publish(newer, running).unwrap());
        assert!(!registry.publish(older, stopped).unwrap());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.generation(), newer);
        assert!(snapshot.iter().all(|n| n.is_running()));
    }

    #[test]
    fn test_publish_rejects_membership_change() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let cycle = registry.begin_cycle();

        let mut nodes = registry.snapshot().nodes().to_vec();
        nodes.reverse();
        assert!(registry.publish(cycle, nodes).is_err());

        let nodes = registry.snapshot().nodes()[..2].to_vec();
        assert!(registry.publish(cycle, nodes).is_err());
        assert_eq!(registry.snapshot().generation(), 0);
    }

    #[test]
    fn test_first_configured_leader_wins() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let cycle = registry.begin_cycle();
        let nodes = with_states(
            &registry,
            &[
                (NodeStatus::Stopped, true),
                (NodeStatus::Running, true),
                (NodeStatus::Running, true),
            ],
        );
        registry.publish(cycle, nodes).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.leader_count(), 2);
        assert_eq!(snapshot.leader().map(Node::id), Some(2));
    }

    #[tokio::test]
    async fn test_subscribers_notified() {
        let registry = NodeRegistry::new(&configs()).unwrap();
        let mut rx = registry.subscribe();

        let cycle = registry.begin_cycle();
        let nodes = with_states(&registry, &[(NodeStatus::Error, false); 3]);
        registry.publish(cycle, nodes).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().generation(), cycle);
    }
}
