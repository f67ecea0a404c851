//! TriRed Control Panel
//!
//! Control-plane client for a small fleet of inference nodes organised
//! around one elected leader: tracks node liveness and role, starts and
//! stops nodes, and routes queries to the current leader.

pub mod dispatcher;
pub mod node;
pub mod node_client;
pub mod poller;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher, NO_LEADER_MESSAGE};
pub use node::{Node, NodeId, NodeStatus};
pub use node_client::{HttpNodeClient, NodeCommand, NodeTransport, StatusReport};
pub use poller::{Poller, PollerHandle, ToggleReport};
pub use registry::{NodeRegistry, RegistrySnapshot};
pub use session::ControlSession;
