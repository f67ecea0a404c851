//! Status polling and node control
//!
//! The poller owns the only write path into the [`NodeRegistry`]: every
//! refresh polls all nodes concurrently, builds a complete snapshot and
//! publishes it in one step.

use crate::node::{Node, NodeId};
use crate::node_client::{NodeCommand, NodeTransport};
use crate::registry::{NodeRegistry, RegistrySnapshot};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trired_common::error::{Result, TriRedError};
use trired_common::METRICS;

/// Outcome of a start/stop toggle
#[derive(Debug)]
pub struct ToggleReport {
    pub node_id: NodeId,

    /// Command that was sent
    pub command: NodeCommand,

    /// Why the command failed, if it did
    pub command_error: Option<TriRedError>,

    /// Registry state after the follow-up refresh
    pub snapshot: RegistrySnapshot,
}

/// Registry poller
pub struct Poller {
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn NodeTransport>,
    poll_interval: Duration,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl Poller {
    /// Create a new poller
    pub fn new(
        registry: Arc<NodeRegistry>,
        transport: Arc<dyn NodeTransport>,
        poll_interval: Duration,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            transport,
            poll_interval,
            request_timeout,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Poll every node and publish the resulting snapshot
    ///
    /// Never fails: an unreachable node is recorded as `error`. Returns the
    /// snapshot that is current once the cycle is done.
    pub async fn refresh(&self) -> RegistrySnapshot {
        if self.shutdown.is_cancelled() {
            return self.registry.snapshot();
        }

        let cycle = self.registry.begin_cycle();
        let timer = METRICS.poller.refresh_duration.start_timer();
        let current = self.registry.snapshot();

        let polls = current.iter().map(|node| self.poll_node(node));
        let nodes = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            nodes = join_all(polls) => Some(nodes),
        };

        // Results that land after teardown are never applied
        let nodes = match nodes {
            Some(nodes) if !self.shutdown.is_cancelled() => nodes,
            _ => {
                debug!("Refresh cycle {} abandoned at shutdown", cycle);
                timer.stop_and_discard();
                METRICS.poller.refresh_discarded.inc();
                return self.registry.snapshot();
            }
        };

        match self.registry.publish(cycle, nodes) {
            Ok(true) => {
                timer.observe_duration();
                METRICS.poller.refresh_total.inc();
            }
            Ok(false) => {
                timer.stop_and_discard();
                METRICS.poller.refresh_discarded.inc();
            }
            Err(e) => {
                timer.stop_and_discard();
                error!("Failed to publish refresh cycle {}: {}", cycle, e);
            }
        }

        self.registry.snapshot()
    }

    /// Poll one node, mapping any failure to an `error` state
    async fn poll_node(&self, node: &Node) -> Node {
        let report = match timeout(self.request_timeout, self.transport.status(node)).await {
            Ok(result) => result,
            Err(_) => Err(TriRedError::timeout(format!(
                "status of node {} after {:?}",
                node.id(),
                self.request_timeout
            ))),
        };

        let state = report.and_then(|report| Ok((report.node_status()?, report.is_leader)));

        match state {
            Ok((status, is_leader)) => node.with_state(status, is_leader),
            Err(e) => {
                warn!("Status poll failed for node {} ({}): {}", node.id(), node.address(), e);
                let node_label = node.id().to_string();
                METRICS
                    .poller
                    .poll_failures
                    .with_label_values(&[node_label.as_str(), e.label()])
                    .inc();
                node.errored()
            }
        }
    }

    /// Start a running node or stop it, then reconcile with a refresh
    ///
    /// The command's own result is reported but never trusted: the returned
    /// snapshot comes from polling after the command finished. An unknown
    /// node id is an error, and so is toggling after shutdown: nothing is
    /// sent then.
    pub async fn toggle(&self, node_id: NodeId) -> Result<ToggleReport> {
        if self.shutdown.is_cancelled() {
            return Err(TriRedError::ShutDown);
        }

        let node = self
            .registry
            .snapshot()
            .get(node_id)
            .cloned()
            .ok_or(TriRedError::UnknownNode(node_id))?;

        let command = NodeCommand::toggling(node.status());
        info!("Sending {} to node {} ({})", command.as_str(), node_id, node.address());
        METRICS
            .poller
            .commands_total
            .with_label_values(&[command.as_str()])
            .inc();

        let command_error = match self.send_command(&node, command).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to {} node {}: {}", command.as_str(), node_id, e);
                METRICS
                    .poller
                    .command_failures
                    .with_label_values(&[command.as_str()])
                    .inc();
                Some(e)
            }
        };

        let snapshot = self.refresh().await;

        Ok(ToggleReport {
            node_id,
            command,
            command_error,
            snapshot,
        })
    }

    /// Send one command, abandoning it if the poller shuts down meanwhile
    async fn send_command(&self, node: &Node, command: NodeCommand) -> Result<()> {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(TriRedError::ShutDown),
            result = timeout(self.request_timeout, self.transport.command(node, command)) => result,
        };

        match result {
            Ok(result) => result,
            Err(_) => Err(TriRedError::timeout(format!(
                "{} of node {} after {:?}",
                command.as_str(),
                node.id(),
                self.request_timeout
            ))),
        }
    }

    /// Spawn the periodic refresh loop
    ///
    /// The first refresh runs immediately, then one every poll interval
    /// until the returned handle is stopped or dropped. Stopping the loop
    /// leaves manual `refresh` and `toggle` usable.
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let shutdown = self.shutdown.child_token();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Polling {} nodes every {:?}", self.registry.node_ids().len(), self.poll_interval);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        self.refresh().await;
                    }
                }
            }

            info!("Poll loop stopped");
        });

        PollerHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Owned handle to the periodic refresh loop
///
/// Dropping the handle cancels the loop; [`PollerHandle::stop`] also waits
/// for it to finish.
pub struct PollerHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel the loop and wait for it to exit
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
