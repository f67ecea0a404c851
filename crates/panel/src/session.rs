//! Control session
//!
//! Ties the registry, poller and dispatcher to one lifetime. Activating the
//! session starts the poll loop; shutting it down stops the loop and makes
//! any outstanding refresh or dispatch drop its result.

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::node::NodeId;
use crate::node_client::{HttpNodeClient, NodeTransport};
use crate::poller::{Poller, PollerHandle, ToggleReport};
use crate::registry::{NodeRegistry, RegistrySnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trired_common::config::TriRedConfig;
use trired_common::error::Result;

/// One operator session against a configured fleet
pub struct ControlSession {
    registry: Arc<NodeRegistry>,
    poller: Arc<Poller>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    poll_loop: Mutex<Option<PollerHandle>>,
}

impl ControlSession {
    /// Build a session that talks HTTP to the configured nodes
    pub fn from_config(config: &TriRedConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpNodeClient::new(config.request_timeout())?);
        Self::with_transport(config, transport)
    }

    /// Build a session over an arbitrary transport
    pub fn with_transport(config: &TriRedConfig, transport: Arc<dyn NodeTransport>) -> Result<Self> {
        let registry = Arc::new(NodeRegistry::new(&config.nodes)?);
        let shutdown = CancellationToken::new();

        let poller = Arc::new(Poller::new(
            registry.clone(),
            transport.clone(),
            config.poll_interval(),
            config.request_timeout(),
            shutdown.child_token(),
        ));

        let dispatcher = Dispatcher::new(
            registry.clone(),
            transport,
            config.request_timeout(),
            shutdown.child_token(),
        );

        Ok(Self {
            registry,
            poller,
            dispatcher,
            shutdown,
            poll_loop: Mutex::new(None),
        })
    }

    /// Start the periodic poll loop (first refresh runs immediately)
    ///
    /// Calling this again while the loop runs, or after shutdown, does
    /// nothing.
    pub fn activate(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut poll_loop = self.poll_loop.lock();
        if poll_loop.is_none() {
            info!("Activating control session for {} nodes", self.registry.node_ids().len());
            *poll_loop = Some(self.poller.clone().start());
        }
    }

    pub fn is_active(&self) -> bool {
        self.poll_loop.lock().is_some() && !self.shutdown.is_cancelled()
    }

    /// Refresh on demand
    pub async fn refresh(&self) -> RegistrySnapshot {
        self.poller.refresh().await
    }

    /// Start or stop one node, then refresh
    pub async fn toggle(&self, node_id: NodeId) -> Result<ToggleReport> {
        self.poller.toggle(node_id).await
    }

    /// Send a query to the current leader
    pub async fn dispatch(&self, query: &str) -> Option<DispatchOutcome> {
        self.dispatcher.dispatch(query).await
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.registry.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.dispatcher.is_busy()
    }

    pub fn last_outcome(&self) -> Option<DispatchOutcome> {
        self.dispatcher.last_outcome()
    }

    /// Stop polling and abandon in-flight work
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let poll_loop = self.poll_loop.lock().take();
        if let Some(handle) = poll_loop {
            handle.stop().await;
        }
        info!("Control session shut down");
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
