//! Leader-routed query dispatch
//!
//! A query goes to exactly one node: the first node in the current registry
//! snapshot that claims leadership. There is no verification round-trip, no
//! retry and no fallback to another node.

use crate::node::NodeId;
use crate::node_client::NodeTransport;
use crate::registry::NodeRegistry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trired_common::error::TriRedError;
use trired_common::METRICS;
use uuid::Uuid;

/// Text reported when no node claims leadership
pub const NO_LEADER_MESSAGE: &str = "No leader node available";

/// Result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The leader answered
    Succeeded { node_id: NodeId, response: String },

    /// No node claimed leadership; nothing was sent
    NoLeader,

    /// The leader was chosen but the exchange failed
    Failed { node_id: NodeId, reason: String },
}

impl DispatchOutcome {
    /// Text shown to the operator
    ///
    /// Failures are prefixed with `Error: ` so they cannot be mistaken for
    /// an answer.
    pub fn text(&self) -> String {
        match self {
            DispatchOutcome::Succeeded { response, .. } => response.clone(),
            DispatchOutcome::NoLeader => NO_LEADER_MESSAGE.to_string(),
            DispatchOutcome::Failed { reason, .. } => format!("Error: {}", reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Succeeded { .. } => "succeeded",
            DispatchOutcome::NoLeader => "no_leader",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Whether a dispatch is currently outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    InFlight,
}

/// Clears the busy flag when the dispatch ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sends queries to the current leader
pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn NodeTransport>,
    request_timeout: Duration,
    shutdown: CancellationToken,
    busy: AtomicBool,
    last_outcome: Mutex<Option<DispatchOutcome>>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        registry: Arc<NodeRegistry>,
        transport: Arc<dyn NodeTransport>,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            transport,
            request_timeout,
            shutdown,
            busy: AtomicBool::new(false),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn state(&self) -> DispatchState {
        if self.is_busy() {
            DispatchState::InFlight
        } else {
            DispatchState::Idle
        }
    }

    /// True while a dispatch is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Outcome of the most recent completed dispatch
    pub fn last_outcome(&self) -> Option<DispatchOutcome> {
        self.last_outcome.lock().clone()
    }

    fn try_begin(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    /// Send `query` to the current leader
    ///
    /// Returns `None` without touching the network when the query is blank,
    /// when another dispatch is already in flight, or when the panel has
    /// shut down (including a shutdown that lands while waiting on the
    /// leader, in which case the late answer is dropped).
    pub async fn dispatch(&self, query: &str) -> Option<DispatchOutcome> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Ignoring blank query");
            return None;
        }

        if self.shutdown.is_cancelled() {
            return None;
        }

        let Some(_busy) = self.try_begin() else {
            debug!("Dispatch already in flight; ignoring query");
            METRICS.dispatch.dispatch_rejected_busy.inc();
            return None;
        };

        let dispatch_id = Uuid::new_v4();
        let snapshot = self.registry.snapshot();

        let outcome = match snapshot.leader() {
            None => {
                info!(%dispatch_id, generation = snapshot.generation(), "No leader to dispatch to");
                DispatchOutcome::NoLeader
            }
            Some(leader) => {
                let node_id = leader.id();
                info!(%dispatch_id, node = node_id, "Dispatching query to leader {}", leader.address());

                let timer = METRICS.dispatch.dispatch_duration.start_timer();
                let result = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    result = timeout(self.request_timeout, self.transport.query(leader, query)) => Some(result),
                };

                let Some(result) = result else {
                    timer.stop_and_discard();
                    debug!(%dispatch_id, "Dispatch abandoned at shutdown");
                    return None;
                };
                timer.observe_duration();

                let result = result.unwrap_or_else(|_| {
                    Err(TriRedError::timeout(format!(
                        "query to node {} after {:?}",
                        node_id, self.request_timeout
                    )))
                });

                match result {
                    Ok(response) => DispatchOutcome::Succeeded { node_id, response },
                    Err(e) => {
                        warn!(%dispatch_id, node = node_id, "Query dispatch failed: {}", e);
                        DispatchOutcome::Failed {
                            node_id,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        METRICS
            .dispatch
            .dispatch_total
            .with_label_values(&[outcome.label()])
            .inc();
        *self.last_outcome.lock() = Some(outcome.clone());

        Some(outcome)
    }
}
